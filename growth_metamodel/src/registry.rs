/// registry.rs — Stratum-group registry
///
/// A thin concurrent index a caller wires the fitting engine up through,
/// keeping multiple fitted meta-models indexed by stratum group. No
/// fitting logic lives here — just lookup by stratum-group key over
/// already-fitted models.
use std::sync::Arc;

use dashmap::DashMap;

use crate::coordinator::FittedMetaModel;

#[derive(Default)]
pub struct StratumGroupRegistry {
    models: DashMap<String, Arc<FittedMetaModel>>,
}

impl StratumGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stratum_group: impl Into<String>, model: FittedMetaModel) {
        self.models.insert(stratum_group.into(), Arc::new(model));
    }

    pub fn get(&self, stratum_group: &str) -> Option<Arc<FittedMetaModel>> {
        self.models.get(stratum_group).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, stratum_group: &str) -> Option<Arc<FittedMetaModel>> {
        self.models.remove(stratum_group).map(|(_, v)| v)
    }

    pub fn keys(&self) -> Vec<String> {
        self.models.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growth::{FormKind, ModelForm};
    use crate::schema::ParamConfigEntry;
    use ndarray::Array2;

    fn dummy_model() -> FittedMetaModel {
        let form = ModelForm { kind: FormKind::Exponential, mixed: false };
        let configs = vec![
            ParamConfigEntry { parameter: "b1".into(), starting_value: 120.0, distribution: "Uniform".into(), dist_parms: vec![0.0, 500.0] },
            ParamConfigEntry { parameter: "b2".into(), starting_value: 0.02, distribution: "Uniform".into(), dist_parms: vec![0.0001, 1.0] },
        ];
        let schema = crate::schema::ParamSchema::build(form, false, false, 1, &configs).unwrap();
        let k = schema.len();
        let parms = schema.starting_values.clone();
        FittedMetaModel::for_test(form, schema, parms, Array2::eye(k), -1.0)
    }

    #[test]
    fn insert_get_and_remove_round_trip() {
        let reg = StratumGroupRegistry::new();
        assert!(reg.is_empty());
        reg.insert("RS38", dummy_model());
        assert_eq!(reg.len(), 1);
        assert!(reg.get("RS38").is_some());
        let removed = reg.remove("RS38");
        assert!(removed.is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn keys_lists_every_stratum_group() {
        let reg = StratumGroupRegistry::new();
        reg.insert("RS38", dummy_model());
        reg.insert("RS41", dummy_model());
        let mut keys = reg.keys();
        keys.sort();
        assert_eq!(keys, vec!["RS38".to_string(), "RS41".to_string()]);
    }
}
