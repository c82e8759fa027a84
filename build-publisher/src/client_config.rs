//! Generate the `updater.toml` that ships with a build.

use crate::config::PublisherConfig;
use crate::error::{PublishError, Result};
use std::path::Path;
use update_engine::config::{InstallConfig, LogConfig, TransferConfig};
use update_engine::Config;

/// Updater configuration pointing at this publisher's mirrors
pub fn client_config(publisher: &PublisherConfig, install_dir: &Path) -> Result<Config> {
    if publisher.mirrors.is_empty() {
        return Err(PublishError::InvalidBuild(
            "no mirrors registered (use add-mirror)".to_string(),
        ));
    }

    let mut install = InstallConfig::new(install_dir);
    install.local_manifest = publisher.manifest.local.clone();

    let config = Config {
        install,
        transfer: TransferConfig {
            remote_manifest: publisher.manifest.remote.clone(),
            ..TransferConfig::default()
        },
        mirrors: publisher.mirrors.clone(),
        log: LogConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

pub fn render(publisher: &PublisherConfig, install_dir: &Path) -> Result<String> {
    Ok(client_config(publisher, install_dir)?.to_toml()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_config_loads_in_updater() {
        let mut publisher = PublisherConfig::new("demo", 4, "2.0");
        publisher.manifest.remote = "demo.remote.json".to_string();
        publisher.add_mirror("cdn", "https://cdn.example.com/demo", 1).unwrap();
        publisher.add_mirror("eu", "https://eu.example.com/demo", 3).unwrap();

        let rendered = render(&publisher, Path::new("/opt/demo")).unwrap();
        let config = Config::from_toml(&rendered).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.install.dir, Path::new("/opt/demo"));
        assert_eq!(config.transfer.remote_manifest, "demo.remote.json");
        let names: Vec<_> = config.mirrors().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["cdn", "eu"]);
    }

    #[test]
    fn test_requires_mirrors() {
        let publisher = PublisherConfig::new("demo", 1, "1.0");
        let result = client_config(&publisher, Path::new("/opt/demo"));
        assert!(matches!(result, Err(PublishError::InvalidBuild(_))));
    }
}
