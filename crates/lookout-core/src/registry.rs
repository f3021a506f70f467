//! Person group cache with a lazily created training group.

use crate::recognition::{RecognitionClient, RecognitionError};
use crate::types::PersonGroup;

/// Default name of the group reserved for enrollment.
pub const DEFAULT_TRAINING_GROUP: &str = "lookout-training";

/// Process-lifetime cache of the remote person groups.
///
/// Exactly one group, identified by name, is the training group. It is only
/// used for enrollment and never for identification.
#[derive(Debug, Clone)]
pub struct PersonGroupRegistry {
    training_name: String,
    groups: Vec<PersonGroup>,
}

impl PersonGroupRegistry {
    pub fn new(training_name: impl Into<String>, groups: Vec<PersonGroup>) -> Self {
        Self {
            training_name: training_name.into(),
            groups,
        }
    }

    /// Populate the cache from the service. A listing failure leaves the
    /// cache empty; the training group is then created on first need.
    pub async fn load(client: &dyn RecognitionClient, training_name: impl Into<String>) -> Self {
        let groups = match client.list_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!(error = %e, "listing person groups failed; starting with an empty cache");
                Vec::new()
            }
        };
        tracing::info!(count = groups.len(), "person groups loaded");
        Self::new(training_name, groups)
    }

    pub fn training_name(&self) -> &str {
        &self.training_name
    }

    pub fn groups(&self) -> &[PersonGroup] {
        &self.groups
    }

    pub fn training_group(&self) -> Option<&PersonGroup> {
        self.groups.iter().find(|g| g.name == self.training_name)
    }

    /// Groups used for identification, i.e. every group except the training group.
    pub fn identification_groups(&self) -> Vec<PersonGroup> {
        self.groups
            .iter()
            .filter(|g| g.name != self.training_name)
            .cloned()
            .collect()
    }

    /// Return the training group, creating it remotely on first need.
    ///
    /// Repeated calls after a successful creation are served from the cache
    /// without contacting the service.
    pub async fn ensure_training_group(
        &mut self,
        client: &dyn RecognitionClient,
    ) -> Result<PersonGroup, RecognitionError> {
        if let Some(group) = self.training_group() {
            return Ok(group.clone());
        }

        let group = PersonGroup {
            id: uuid::Uuid::new_v4().to_string(),
            name: self.training_name.clone(),
        };
        client.create_group(&group.id, &group.name).await?;
        tracing::info!(id = %group.id, name = %group.name, "training group created");

        self.groups.push(group.clone());
        Ok(group)
    }
}
