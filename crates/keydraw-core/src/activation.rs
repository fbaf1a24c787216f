// Keydraw Layer Activation
// Tracks which held keys lead to each layer and marks them on the keymap

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::keymap::{LayoutKey, ALTERNATE_HELD_TYPE, HELD_TYPE};

/// A layer that is active whenever all of `if_layers` are active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalLayer {
    pub then_layer: usize,
    pub if_layers: Vec<usize>,
}

/// Records the key positions that are held to reach each layer
///
/// Activations must be recorded in non-decreasing target layer order so that
/// the activators of a source layer are complete when another layer inherits
/// them. One tracker belongs to one parse.
#[derive(Debug, Clone, Default)]
pub struct LayerActivationTracker {
    /// Target layer -> key position -> whether the position is an alternate way in
    activated_from: BTreeMap<usize, BTreeMap<usize, bool>>,
    mark_alternate: bool,
}

impl LayerActivationTracker {
    pub fn new(mark_alternate: bool) -> Self {
        Self {
            activated_from: BTreeMap::new(),
            mark_alternate,
        }
    }

    /// Record that holding `key_positions` on `from_layers` activates `to_layer`
    ///
    /// Activations from a layer at or above the target are ignored. Once a
    /// layer has activators, later paths are ignored unless alternate marking
    /// is enabled, in which case they are recorded as alternates. An inherited
    /// activator is an alternate when it was one on the source layer or when
    /// this activation is.
    pub fn record_activation(&mut self, from_layers: &[usize], to_layer: usize, key_positions: &[usize]) {
        if from_layers.iter().any(|&from| from >= to_layer) {
            return;
        }
        let alternate = self.activated_from.contains_key(&to_layer);
        if alternate && !self.mark_alternate {
            return;
        }

        let mut additions: Vec<(usize, bool)> = key_positions.iter().map(|&p| (p, alternate)).collect();
        for from in from_layers {
            if let Some(inherited) = self.activated_from.get(from) {
                additions.extend(
                    inherited
                        .iter()
                        .map(|(&position, &was_alternate)| (position, was_alternate || alternate)),
                );
            }
        }

        let activators = self.activated_from.entry(to_layer).or_default();
        for (position, is_alternate) in additions {
            activators
                .entry(position)
                .and_modify(|existing| *existing &= is_alternate)
                .or_insert(is_alternate);
        }
    }

    /// Record conditional layers after all direct activations, in target order
    pub fn record_conditional_layers(&mut self, conditional_layers: &[ConditionalLayer]) {
        let mut ordered: Vec<&ConditionalLayer> = conditional_layers.iter().collect();
        ordered.sort_by_key(|c| c.then_layer);
        for conditional in ordered {
            self.record_activation(&conditional.if_layers, conditional.then_layer, &[]);
        }
    }

    /// Activators of a layer as `(key_position, is_alternate)`, ordered by position
    pub fn activators(&self, layer: usize) -> Vec<(usize, bool)> {
        self.activated_from
            .get(&layer)
            .map(|positions| positions.iter().map(|(&p, &alt)| (p, alt)).collect())
            .unwrap_or_default()
    }

    /// Mark every recorded activator on the layers, in layer index order
    ///
    /// Transparent keys lose their legend and only keep the held marker. An
    /// alternate marker never replaces a primary one.
    pub fn apply_held_markers(&self, layers: &mut IndexMap<String, Vec<LayoutKey>>, trans_key: &LayoutKey) {
        for (&layer_index, positions) in &self.activated_from {
            let Some((name, keys)) = layers.get_index_mut(layer_index) else {
                log::warn!("Held keys recorded for missing layer {}", layer_index);
                continue;
            };
            for (&position, &is_alternate) in positions {
                let Some(key) = keys.get_mut(position) else {
                    log::warn!(
                        "Held key position {} is outside layer \"{}\" with {} keys",
                        position,
                        name,
                        keys.len()
                    );
                    continue;
                };
                let marker = if is_alternate { ALTERNATE_HELD_TYPE } else { HELD_TYPE };
                if is_alternate && key.key_type == HELD_TYPE {
                    continue;
                }
                if key == trans_key {
                    *key = LayoutKey::typed(marker);
                } else {
                    key.key_type = marker.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherits_activators_of_source_layer() {
        let mut tracker = LayerActivationTracker::new(false);
        tracker.record_activation(&[], 2, &[5]);
        tracker.record_activation(&[2], 4, &[7]);
        assert_eq!(tracker.activators(4), vec![(5, false), (7, false)]);
    }

    #[test]
    fn test_first_path_wins_without_alternates() {
        let mut tracker = LayerActivationTracker::new(false);
        tracker.record_activation(&[], 2, &[5]);
        tracker.record_activation(&[], 2, &[9]);
        assert_eq!(tracker.activators(2), vec![(5, false)]);
    }

    #[test]
    fn test_alternate_paths_are_flagged() {
        let mut tracker = LayerActivationTracker::new(true);
        tracker.record_activation(&[], 2, &[5]);
        tracker.record_activation(&[], 2, &[9]);
        assert_eq!(tracker.activators(2), vec![(5, false), (9, true)]);
    }

    #[test]
    fn test_alternate_never_downgrades_primary() {
        let mut tracker = LayerActivationTracker::new(true);
        tracker.record_activation(&[], 2, &[5]);
        tracker.record_activation(&[0], 2, &[5, 6]);
        assert_eq!(tracker.activators(2), vec![(5, false), (6, true)]);
    }

    #[test]
    fn test_alternate_edge_makes_inherited_primary_alternate() {
        let mut tracker = LayerActivationTracker::new(true);
        tracker.record_activation(&[], 1, &[5]);
        tracker.record_activation(&[], 2, &[7]);
        tracker.record_activation(&[1], 2, &[8]);
        assert_eq!(tracker.activators(2), vec![(5, true), (7, false), (8, true)]);
    }

    #[test]
    fn test_primary_edge_keeps_inherited_alternate() {
        let mut tracker = LayerActivationTracker::new(true);
        tracker.record_activation(&[], 1, &[5]);
        tracker.record_activation(&[], 1, &[6]);
        tracker.record_activation(&[1], 2, &[8]);
        assert_eq!(tracker.activators(1), vec![(5, false), (6, true)]);
        assert_eq!(tracker.activators(2), vec![(5, false), (6, true), (8, false)]);
    }

    #[test]
    fn test_reverse_activation_is_ignored() {
        let mut tracker = LayerActivationTracker::new(false);
        tracker.record_activation(&[3], 1, &[0]);
        tracker.record_activation(&[1], 1, &[0]);
        assert!(tracker.activators(1).is_empty());
    }

    #[test]
    fn test_conditional_layer_inherits_all_prerequisites() {
        let mut tracker = LayerActivationTracker::new(false);
        tracker.record_activation(&[0], 1, &[10]);
        tracker.record_activation(&[0], 2, &[11]);
        tracker.record_activation(&[1, 2], 3, &[]);
        assert_eq!(tracker.activators(3), vec![(10, false), (11, false)]);
    }

    #[test]
    fn test_conditional_layers_are_recorded_in_target_order() {
        let mut tracker = LayerActivationTracker::new(false);
        tracker.record_activation(&[0], 1, &[10]);
        tracker.record_activation(&[0], 2, &[11]);
        tracker.record_conditional_layers(&[
            ConditionalLayer {
                then_layer: 4,
                if_layers: vec![1, 3],
            },
            ConditionalLayer {
                then_layer: 3,
                if_layers: vec![1, 2],
            },
        ]);
        assert_eq!(tracker.activators(3), vec![(10, false), (11, false)]);
        assert_eq!(tracker.activators(4), vec![(10, false), (11, false)]);
    }

    #[test]
    fn test_apply_held_markers() {
        let trans = LayoutKey {
            tap: "▽".to_string(),
            key_type: "trans".to_string(),
            ..LayoutKey::default()
        };
        let mut layers: IndexMap<String, Vec<LayoutKey>> = IndexMap::new();
        layers.insert("base".to_string(), vec![LayoutKey::tap("A"), LayoutKey::tap("B")]);
        layers.insert("nav".to_string(), vec![trans.clone(), LayoutKey::tap("X"), trans.clone()]);

        let mut tracker = LayerActivationTracker::new(true);
        tracker.record_activation(&[0], 1, &[0]);
        tracker.record_activation(&[0], 1, &[1, 0, 9]);
        tracker.apply_held_markers(&mut layers, &trans);

        let nav = &layers["nav"];
        assert_eq!(nav[0], LayoutKey::typed(HELD_TYPE));
        assert_eq!(nav[1].tap, "X");
        assert_eq!(nav[1].key_type, ALTERNATE_HELD_TYPE);
        assert_eq!(nav[2], trans);
    }
}
