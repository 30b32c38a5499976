use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the configuration file looked up in the project directory.
pub const CONFIG_FILE: &str = "shipyard.toml";

/// Environment variable that overrides [`BuilderConfig::base_image`].
///
/// The builder compose recipes read the same variable, so both sides agree
/// on the image name.
pub const BASE_IMAGE_ENV: &str = "FRANKENPHP_BASE_IMAGE";

/// shipyard.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipyardConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default = "default_flavors")]
    pub flavors: Vec<FlavorConfig>,
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// PHP application tree to package
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Staging directory the builder recipe copies into the image
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,
    /// Root for timestamped distribution output
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
    /// Where the intermediate source archive is written
    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Compose file holding the base-image and app-builder services
    #[serde(default = "default_builder_compose")]
    pub compose_file: PathBuf,
    /// Base FrankenPHP build image
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// Compose service that builds the base image
    #[serde(default = "default_base_service")]
    pub base_service: String,
    /// Compose profile gating the base-image service
    #[serde(default = "default_base_profile")]
    pub base_profile: String,
    /// Compose service that embeds the app and compiles the binary
    #[serde(default = "default_app_service")]
    pub app_service: String,
    /// Path of the compiled binary inside the builder container
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,
    /// File name the extracted binary is installed under
    #[serde(default = "default_binary_name")]
    pub binary_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Override directories, applied in order. Later directories win.
    #[serde(default = "default_overlay_dirs")]
    pub dirs: Vec<PathBuf>,
    /// Glob patterns, relative to each overlay directory
    #[serde(default = "default_overlay_patterns")]
    pub patterns: Vec<String>,
    /// Package-relative directory receiving the overlay files
    #[serde(default = "default_overlay_target")]
    pub target: PathBuf,
}

/// One deployment flavor: a directory owning its own templates and a build script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorConfig {
    pub name: String,
    pub dir: PathBuf,
    #[serde(default = "default_flavor_script")]
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Flavor whose bundle is rolled out
    #[serde(default = "default_deploy_flavor")]
    pub flavor: String,
    /// Compose file, relative to the flavor bundle
    #[serde(default = "default_deploy_compose")]
    pub compose_file: PathBuf,
    /// Compose service polled for health
    #[serde(default = "default_deploy_service")]
    pub service: String,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Log lines surfaced when the service dies during rollout
    #[serde(default = "default_log_tail")]
    pub log_tail: u32,
    /// Port reported when neither overrides nor the env file set APP_PORT
    #[serde(default = "default_port")]
    pub default_port: u16,
}

impl Default for ShipyardConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            builder: BuilderConfig::default(),
            overlay: OverlayConfig::default(),
            flavors: default_flavors(),
            deploy: DeployConfig::default(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            package_dir: default_package_dir(),
            dist_dir: default_dist_dir(),
            archive_path: default_archive_path(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            compose_file: default_builder_compose(),
            base_image: default_base_image(),
            base_service: default_base_service(),
            base_profile: default_base_profile(),
            app_service: default_app_service(),
            artifact_path: default_artifact_path(),
            binary_name: default_binary_name(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dirs: default_overlay_dirs(),
            patterns: default_overlay_patterns(),
            target: default_overlay_target(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            flavor: default_deploy_flavor(),
            compose_file: default_deploy_compose(),
            service: default_deploy_service(),
            health_timeout_secs: default_health_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            log_tail: default_log_tail(),
            default_port: default_port(),
        }
    }
}

impl ShipyardConfig {
    /// Load from shipyard.toml in the given directory, or return defaults if not found.
    ///
    /// `FRANKENPHP_BASE_IMAGE`, when set and non-empty, replaces the configured base image.
    pub fn load(project_dir: &std::path::Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })?
        } else {
            tracing::debug!(dir = %project_dir.display(), "no shipyard.toml; using defaults");
            Self::default()
        };

        if let Ok(image) = std::env::var(BASE_IMAGE_ENV)
            && !image.trim().is_empty()
        {
            config.builder.base_image = image.trim().to_owned();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.deploy.poll_interval_secs == 0 {
            return Err(crate::Error::InvalidConfig {
                field: "deploy.poll_interval_secs",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.builder.binary_name.is_empty() || self.builder.binary_name.contains('/') {
            return Err(crate::Error::InvalidConfig {
                field: "builder.binary_name",
                reason: format!("{:?} is not a plain file name", self.builder.binary_name),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for flavor in &self.flavors {
            if !seen.insert(flavor.name.as_str()) {
                return Err(crate::Error::InvalidConfig {
                    field: "flavors",
                    reason: format!("duplicate flavor name '{}'", flavor.name),
                });
            }
        }
        Ok(())
    }

    pub fn flavor(&self, name: &str) -> Option<&FlavorConfig> {
        self.flavors.iter().find(|f| f.name == name)
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("../apps/orangescrum-v4")
}

fn default_package_dir() -> PathBuf {
    PathBuf::from("builder/package")
}

fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("builder/repo.tar")
}

fn default_builder_compose() -> PathBuf {
    PathBuf::from("builder/docker-compose.yaml")
}

fn default_base_image() -> String {
    "orangescrum-cloud-base:latest".to_owned()
}

fn default_base_service() -> String {
    "frankenphp-base-builder".to_owned()
}

fn default_base_profile() -> String {
    "base-build".to_owned()
}

fn default_app_service() -> String {
    "orangescrum-app-builder".to_owned()
}

fn default_artifact_path() -> String {
    "/go/src/app/dist/frankenphp-linux-x86_64".to_owned()
}

fn default_binary_name() -> String {
    "osv4-prod".to_owned()
}

fn default_overlay_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("orangescrum-cloud-common/config"),
        PathBuf::from("orangescrum-cloud/config"),
    ]
}

fn default_overlay_patterns() -> Vec<String> {
    vec!["**/*.example.php".to_owned()]
}

fn default_overlay_target() -> PathBuf {
    PathBuf::from("config")
}

fn default_flavors() -> Vec<FlavorConfig> {
    vec![
        FlavorConfig {
            name: "docker".to_owned(),
            dir: PathBuf::from("orangescrum-cloud-docker"),
            script: default_flavor_script(),
        },
        FlavorConfig {
            name: "native".to_owned(),
            dir: PathBuf::from("orangescrum-cloud-native"),
            script: default_flavor_script(),
        },
    ]
}

fn default_flavor_script() -> String {
    "build.sh".to_owned()
}

fn default_deploy_flavor() -> String {
    "docker".to_owned()
}

fn default_deploy_compose() -> PathBuf {
    PathBuf::from("docker-compose.yaml")
}

fn default_deploy_service() -> String {
    "orangescrum-app".to_owned()
}

fn default_health_timeout_secs() -> u64 {
    180
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_log_tail() -> u32 {
    50
}

fn default_port() -> u16 {
    8080
}
