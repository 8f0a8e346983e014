//! Merge per-layer entity lists into the canonical desired state.

use reconciler_core::{DesiredState, ManifestEntity, PackageLayer};

#[derive(Debug, Clone)]
pub struct MergeWarning {
    pub message: String,
}

/// Merge layers in precedence order (base, org, project — later overrides
/// earlier). Emits warnings for duplicates within a single layer and for
/// overrides caused by higher layers.
pub fn merge_layers(layers: &[(PackageLayer, Vec<ManifestEntity>)]) -> (DesiredState, Vec<MergeWarning>) {
    let mut state = DesiredState::new();
    let mut warnings = Vec::new();

    let mut ordered: Vec<&(PackageLayer, Vec<ManifestEntity>)> = layers.iter().collect();
    ordered.sort_by_key(|(layer, _)| PackageLayer::ORDER.iter().position(|l| l == layer).unwrap_or(usize::MAX));

    for (layer, entities) in ordered {
        // Duplicate-within-layer detection: stable order, first survives.
        let mut seen_in_layer = std::collections::HashSet::new();
        for entity in entities {
            let key = (entity.kind(), entity.name.clone());
            if !seen_in_layer.insert(key.clone()) {
                warnings.push(MergeWarning {
                    message: format!(
                        "duplicate {} '{}' within layer {layer}; first declaration wins",
                        entity.kind(),
                        entity.name
                    ),
                });
                continue;
            }

            if let Some(existing) = state.get(entity.kind(), &entity.name) {
                let existing_layer = existing.layer.expect("merged entity always has a layer");
                if existing_layer != *layer {
                    warnings.push(MergeWarning {
                        message: format!(
                            "{} '{}' from layer {} overridden by layer {layer}",
                            entity.kind(),
                            entity.name,
                            existing_layer
                        ),
                    });
                }
            }

            state.insert(entity.clone().with_layer(*layer));
        }
    }

    (state, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconciler_core::entity::{BlockSpec, EntitySpec};
    use reconciler_core::Kind;

    fn block(name: &str, value: &str) -> ManifestEntity {
        ManifestEntity {
            name: name.to_string(),
            description: "d".to_string(),
            layer: None,
            spec: EntitySpec::Block(BlockSpec {
                label: name.to_string(),
                value: value.to_string(),
                limit: None,
                read_only: false,
            }),
        }
    }

    #[test]
    fn later_layer_overrides_earlier() {
        let layers = vec![
            (PackageLayer::Base, vec![block("persona", "base value")]),
            (PackageLayer::Project, vec![block("persona", "project value")]),
        ];
        let (state, warnings) = merge_layers(&layers);
        let entity = state.get(Kind::Block, "persona").unwrap();
        assert_eq!(entity.layer, Some(PackageLayer::Project));
        match &entity.spec {
            EntitySpec::Block(b) => assert_eq!(b.value, "project value"),
            _ => panic!("expected block"),
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("overridden"));
    }

    #[test]
    fn duplicate_within_layer_keeps_first() {
        let layers = vec![(
            PackageLayer::Base,
            vec![block("persona", "first"), block("persona", "second")],
        )];
        let (state, warnings) = merge_layers(&layers);
        let entity = state.get(Kind::Block, "persona").unwrap();
        match &entity.spec {
            EntitySpec::Block(b) => assert_eq!(b.value, "first"),
            _ => panic!("expected block"),
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("duplicate"));
    }

    #[test]
    fn merge_is_order_independent_of_input_order() {
        let layers_a = vec![
            (PackageLayer::Project, vec![block("persona", "project value")]),
            (PackageLayer::Base, vec![block("persona", "base value")]),
        ];
        let (state_a, _) = merge_layers(&layers_a);
        let layers_b = vec![
            (PackageLayer::Base, vec![block("persona", "base value")]),
            (PackageLayer::Project, vec![block("persona", "project value")]),
        ];
        let (state_b, _) = merge_layers(&layers_b);
        assert_eq!(
            state_a.get(Kind::Block, "persona").unwrap().spec,
            state_b.get(Kind::Block, "persona").unwrap().spec
        );
    }
}
