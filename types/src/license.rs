use serde::{Deserialize, Serialize};

/// Decoded license constraints. The source text lives on `Site::license`;
/// the fabric and install/expand drivers consume this parsed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub max_nodes: u32,
    pub max_cores: u32,
    pub allowed_instance_types: Vec<String>,
}

impl License {
    pub fn allows_instance_type(&self, instance_type: &str) -> bool {
        self.allowed_instance_types.is_empty()
            || self
                .allowed_instance_types
                .iter()
                .any(|t| t == instance_type)
    }
}
