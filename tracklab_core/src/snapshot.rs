//! In-memory snapshot of a model, ready for any serde serializer.
//!
//! Holds spots (identity, name, frame, coordinates, features), links
//! (endpoints, weight, features) and track features keyed by member set.
//! Track indices are reassigned on import; values follow their members.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::error::ModelError;
use crate::model::Model;
use crate::settings::Settings;
use crate::spot::{Spot, SpotId};
use crate::values::FeatureMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRecord {
    pub id: SpotId,
    pub name: String,
    pub frame: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub features: FeatureMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: SpotId,
    pub target: SpotId,
    pub weight: f64,
    pub features: FeatureMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Member spots, ascending
    pub spots: Vec<SpotId>,
    pub features: FeatureMap,
}

/// Complete model state except analyzers, filters and settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub spots: Vec<SpotRecord>,
    pub edges: Vec<EdgeRecord>,
    pub tracks: Vec<TrackRecord>,
}

impl ModelSnapshot {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Model {
    /// Captures the model. Track values are only captured when the track
    /// index is current.
    pub fn snapshot(&self) -> ModelSnapshot {
        let spots = self
            .graph
            .spots()
            .map(|spot| {
                let p = spot.position();
                SpotRecord {
                    id: spot.id(),
                    name: spot.name().to_string(),
                    frame: spot.frame(),
                    x: p.x,
                    y: p.y,
                    z: p.z,
                    features: spot.features().clone(),
                }
            })
            .collect();

        let edges = self
            .graph
            .edges()
            .map(|edge| EdgeRecord {
                source: edge.source(),
                target: edge.target(),
                weight: edge.weight(),
                features: edge.features().clone(),
            })
            .collect();

        let tracks = if self.tracks.is_stale(&self.graph) {
            Vec::new()
        } else {
            self.tracks
                .tracks()
                .filter_map(|track| {
                    let values = self.features.track_feature_values(track.index)?;
                    Some(TrackRecord {
                        spots: track.spots.iter().copied().collect(),
                        features: values.clone(),
                    })
                })
                .collect()
        };

        ModelSnapshot { spots, edges, tracks }
    }

    /// Rebuilds a model from a snapshot.
    ///
    /// Spot identifiers are kept and reserved in the global counter. Track
    /// records whose member set is not a component of the restored graph are
    /// dropped with a warning.
    pub fn from_snapshot(settings: Settings, snapshot: ModelSnapshot) -> Result<Model, ModelError> {
        let mut model = Model::new(settings);

        let spots = snapshot
            .spots
            .into_iter()
            .map(|r| Spot::restore(r.id, r.name, Vector3::new(r.x, r.y, r.z), r.frame, r.features))
            .collect::<Result<Vec<_>, _>>()?;
        model.add_spots(spots)?;

        for record in snapshot.edges {
            let key = model.graph.add_edge(record.source, record.target, record.weight)?;
            if let Some(map) = model.graph.edge_features_mut(key) {
                map.merge(record.features);
            }
        }

        model.rebuild_track_index();
        for record in snapshot.tracks {
            let members: BTreeSet<SpotId> = record.spots.iter().copied().collect();
            let index = record
                .spots
                .first()
                .and_then(|id| model.tracks.track_of(*id))
                .filter(|index| model.tracks.track_spots(*index).map_or(false, |s| *s == members));
            match index {
                Some(index) => model.features.restore_track_values(index, record.features),
                None => warn!("Dropping track values for {} spots: not a component", members.len()),
            }
        }

        info!(
            "Restored model: {} spots, {} links, {} tracks",
            model.graph.spot_count(),
            model.graph.edge_count(),
            model.tracks.track_count()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracklab_tracks::TrackIndex;
    use crate::values::FeatureValue;

    fn populated() -> (Model, Vec<SpotId>) {
        let mut model = Model::default();
        let ids: Vec<SpotId> = (0..4)
            .map(|i| {
                model
                    .add_spot(
                        Spot::detected(Vector3::new(i as f64, 1.0, 0.0), i, 1.5, 3.0)
                            .with_name(format!("s{}", i)),
                    )
                    .unwrap()
            })
            .collect();
        model.add_edge(ids[0], ids[1], None).unwrap();
        model.add_edge(ids[1], ids[2], Some(9.0)).unwrap();
        model.register_stock_analyzers().unwrap();
        model.compute_all_features().unwrap();
        (model, ids)
    }

    #[test]
    fn test_json_round_trip() {
        let (model, ids) = populated();
        let snapshot = model.snapshot();
        assert_eq!(snapshot.spots.len(), 4);
        assert_eq!(snapshot.edges.len(), 2);
        assert_eq!(snapshot.tracks.len(), 2);

        let json = snapshot.to_json_pretty().unwrap();
        let decoded = ModelSnapshot::from_json_str(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let mut restored = Model::from_snapshot(Settings::default(), decoded).unwrap();
        assert_eq!(restored.snapshot(), snapshot);

        let spot = restored.graph().spot(ids[2]).unwrap();
        assert_eq!(spot.name(), "s2");
        assert_eq!(restored.graph().edge_between(ids[1], ids[2]).unwrap().weight(), 9.0);

        let index = restored.track_of(ids[0]).unwrap();
        assert_eq!(restored.track_feature(index, "NUMBER_SPOTS"), FeatureValue::Known(3.0));
    }

    #[test]
    fn test_restored_ids_are_reserved() {
        let far = SpotId(Spot::new(Vector3::zeros(), 0).id().0 + 1_000);
        let snapshot = ModelSnapshot {
            spots: vec![SpotRecord {
                id: far,
                name: "far".to_string(),
                frame: 0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                features: FeatureMap::new(),
            }],
            ..Default::default()
        };

        let restored = Model::from_snapshot(Settings::default(), snapshot).unwrap();
        assert!(restored.graph().contains_spot(far));
        assert!(Spot::new(Vector3::zeros(), 0).id() > far);
    }

    #[test]
    fn test_last_spot_id_is_rejected() {
        let snapshot = ModelSnapshot {
            spots: vec![SpotRecord {
                id: SpotId(u64::MAX),
                name: "last".to_string(),
                frame: 0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                features: FeatureMap::new(),
            }],
            ..Default::default()
        };

        assert_eq!(
            Model::from_snapshot(Settings::default(), snapshot).unwrap_err(),
            ModelError::IdOutOfRange(SpotId(u64::MAX))
        );
    }

    #[test]
    fn test_restore_into_dirty_topology_fails() {
        let (model, ids) = populated();
        let mut snapshot = model.snapshot();
        snapshot.edges.push(EdgeRecord {
            source: ids[0],
            target: ids[0],
            weight: 1.0,
            features: FeatureMap::new(),
        });
        assert!(matches!(
            Model::from_snapshot(Settings::default(), snapshot),
            Err(ModelError::InvalidEdge { .. })
        ));
    }

    #[test]
    fn test_stale_track_values_are_dropped() {
        let (model, ids) = populated();
        let mut snapshot = model.snapshot();
        snapshot.tracks[0].spots.push(ids[3]);

        let restored = Model::from_snapshot(Settings::default(), snapshot).unwrap();
        assert_eq!(restored.track_feature(TrackIndex(0), "NUMBER_SPOTS"), FeatureValue::Unknown);
        assert_eq!(restored.track_feature(TrackIndex(1), "NUMBER_SPOTS"), FeatureValue::Known(1.0));
    }
}
