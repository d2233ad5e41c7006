use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

/// static cluster description loaded by the embedding layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// cluster-level member addresses, ordered. the position in this list is
    /// the member index
    pub member_addresses: Vec<String>,

    pub bind_ip: String,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl ClusterConfig {
    pub fn new_local() -> Self {
        ClusterConfig {
            member_addresses: Vec::new(),
            bind_ip: "127.0.0.1".to_string(),
            log_level: None,
        }
    }
}

pub fn load_config(path: PathBuf) -> anyhow::Result<ClusterConfig> {
    let context = read_config_from_path(path)?;
    serde_yaml::from_str(&context).map_err(|e| anyhow!(e))
}

pub(crate) fn read_config_from_path(path: PathBuf) -> anyhow::Result<String> {
    let mut file = File::open(path)?;
    let mut context = String::new();
    file.read_to_string(&mut context)?;
    Ok(context)
}

#[cfg(test)]
mod tests {
    use crate::core::cluster::ClusterConfig;

    #[test]
    pub fn config_yaml_test() {
        let yaml = r#"
member_addresses:
  - "10.0.0.1:5701"
  - "10.0.0.2:5701"
bind_ip: "0.0.0.0"
"#;
        let config: ClusterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.member_addresses.len(), 2);
        assert_eq!(config.bind_ip, "0.0.0.0");
        assert_eq!(config.log_level, None);
    }
}
