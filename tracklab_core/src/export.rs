//! Statistics tables for visible tracks.
//!
//! Three tables: spots in visible tracks, links in visible tracks, and the
//! visible tracks themselves. Edge and track features are recomputed before
//! collection. Cells hold known values only; an uncomputed value is absent,
//! never zero.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

use crate::error::ModelError;
use crate::model::Model;
use crate::spot::SpotId;
use crate::tracklab_graph::EdgeKey;
use crate::tracklab_tracks::TrackIndex;
use crate::values::FeatureMap;

/// Column names plus rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table<R> {
    /// Feature columns in catalog order
    pub columns: Vec<String>,
    pub rows: Vec<R>,
}

/// One spot of a visible track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRow {
    pub label: String,
    pub id: SpotId,
    pub track: TrackIndex,
    pub frame: usize,
    pub features: FeatureMap,
}

/// One link of a visible track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub label: String,
    pub source: SpotId,
    pub target: SpotId,
    pub track: TrackIndex,
    pub weight: f64,
    pub features: FeatureMap,
}

/// One visible track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRow {
    pub label: String,
    pub index: TrackIndex,
    pub spot_count: usize,
    pub edge_count: usize,
    pub features: FeatureMap,
}

/// The three statistics tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsTables {
    pub spots: Table<SpotRow>,
    pub edges: Table<EdgeRow>,
    pub tracks: Table<TrackRow>,
}

fn known_cells(values: &FeatureMap, columns: &[String]) -> FeatureMap {
    columns
        .iter()
        .filter_map(|name| values.get(name).known().map(|v| (name.as_str(), v)))
        .collect()
}

impl StatsTables {
    /// Recomputes edge and track features, then collects rows for every
    /// visible track in index order. Spots are ordered by frame, then id.
    pub fn collect(model: &mut Model) -> Result<Self, ModelError> {
        let edges: Vec<EdgeKey> = model.graph.edge_keys().collect();
        model.compute_edge_features(&edges, None)?;
        let indices = model.track_indices();
        model.compute_track_features(&indices, None)?;

        let visible = model.visible_track_indices();

        let spot_columns = model.features.spot_features().to_vec();
        let edge_columns = model.features.edge_features().to_vec();
        let track_columns = model.features.track_features().to_vec();

        let mut spot_rows = Vec::new();
        let mut edge_rows = Vec::new();
        let mut track_rows = Vec::new();

        for index in visible {
            let track = model.tracks.track(index)?;

            let mut spots: Vec<_> = track.spots.iter().filter_map(|id| model.graph.spot(*id)).collect();
            spots.sort_by_key(|s| (s.frame(), s.id()));
            for spot in spots {
                spot_rows.push(SpotRow {
                    label: spot.name().to_string(),
                    id: spot.id(),
                    track: index,
                    frame: spot.frame(),
                    features: known_cells(spot.features(), &spot_columns),
                });
            }

            for edge in track.edges.iter().filter_map(|key| model.graph.edge(*key)) {
                let name_of = |id: SpotId| model.graph.spot(id).map_or_else(|| id.to_string(), |s| s.name().to_string());
                edge_rows.push(EdgeRow {
                    label: format!("{} → {}", name_of(edge.source()), name_of(edge.target())),
                    source: edge.source(),
                    target: edge.target(),
                    track: index,
                    weight: edge.weight(),
                    features: known_cells(edge.features(), &edge_columns),
                });
            }

            let values = model.features.track_feature_values(index).cloned().unwrap_or_default();
            track_rows.push(TrackRow {
                label: format!("Track_{}", index),
                index,
                spot_count: track.spot_count(),
                edge_count: track.edge_count(),
                features: known_cells(&values, &track_columns),
            });
        }

        Ok(Self {
            spots: Table {
                columns: spot_columns,
                rows: spot_rows,
            },
            edges: Table {
                columns: edge_columns,
                rows: edge_rows,
            },
            tracks: Table {
                columns: track_columns,
                rows: track_rows,
            },
        })
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = self.to_json_pretty()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
