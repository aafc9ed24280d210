use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use orc_common::{Error, Result};

/// Annotation key previous ConfigMap data is preserved under before an
/// update, so a later rollback can restore the exact prior snapshot.
pub const PREVIOUS_DATA_ANNOTATION: &str = "orchestrator.eosin.io/previous-data";

pub struct ConfigMapStore {
    client: Client,
    namespace: String,
}

impl ConfigMapStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// `Ok(None)` when the ConfigMap is absent — tolerant lookup, matching
    /// the spec-normative behavior for environment reads.
    pub async fn get(&self, name: &str) -> Result<Option<ConfigMap>> {
        match self.api().get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(Error::Other(anyhow::anyhow!("get configmap {name}: {e}"))),
        }
    }

    /// Merges `updates` into the named ConfigMap's data (creating it if
    /// absent), preserving the prior data snapshot as a JSON annotation.
    /// Returns the previous data, if any.
    pub async fn merge(
        &self,
        name: &str,
        updates: BTreeMap<String, String>,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api = self.api();
        match self.get(name).await? {
            None => {
                let mut cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                cm.data = Some(updates.into_iter().collect());
                api.create(&PostParams::default(), &cm)
                    .await
                    .map_err(|e| Error::Other(anyhow::anyhow!("create configmap {name}: {e}")))?;
                Ok(None)
            }
            Some(existing) => {
                let previous = existing.data.clone().unwrap_or_default();
                let mut merged = previous.clone();
                merged.extend(updates);

                let previous_json = serde_json::to_string(&previous)
                    .map_err(|e| Error::Other(anyhow::anyhow!("serialize previous data: {e}")))?;

                let mut annotations = existing.metadata.annotations.clone().unwrap_or_default();
                annotations.insert(PREVIOUS_DATA_ANNOTATION.to_string(), previous_json);

                let patch = serde_json::json!({
                    "metadata": { "annotations": annotations },
                    "data": merged,
                });
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Error::Other(anyhow::anyhow!("patch configmap {name}: {e}")))?;
                Ok(Some(previous))
            }
        }
    }

    /// Restores the data recorded under `PREVIOUS_DATA_ANNOTATION`, if the
    /// ConfigMap still carries one.
    pub async fn rollback(&self, name: &str) -> Result<bool> {
        let Some(existing) = self.get(name).await? else {
            return Ok(false);
        };
        let Some(previous_json) = existing
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(PREVIOUS_DATA_ANNOTATION))
        else {
            return Ok(false);
        };
        let previous: BTreeMap<String, String> = serde_json::from_str(previous_json)
            .map_err(|e| Error::Other(anyhow::anyhow!("deserialize previous data: {e}")))?;

        let patch = serde_json::json!({ "data": previous });
        self.api()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("rollback configmap {name}: {e}")))?;
        Ok(true)
    }
}
