//! Process environment handed to the controller under test.

use std::collections::BTreeMap;

use crate::HarnessConfig;

/// Variable redirecting the UCI configuration directory.
pub const CONFIG_DIR_VAR: &str = "DEFAULT_UCI_CONFIG_DIR";
/// Variable redirecting the helper script root.
pub const SCRIPT_ROOT_VAR: &str = "FORIS_CMDLINE_ROOT";
/// Variable redirecting the file root.
pub const FILE_ROOT_VAR: &str = "FORIS_FILE_ROOT";
/// Variable pointing at the mocked hardware tree.
pub const HW_ROOT_VAR: &str = "TURRISHW_ROOT";
/// Variable selecting the updater bindings module.
pub const UPDATER_MODULE_VAR: &str = "FC_UPDATER_MODULE";

impl HarnessConfig {
    /// Builds the controller's environment from `base`.
    ///
    /// The redirect variables replace whatever `base` carries and the
    /// caller's overrides are applied last, so they win over both.
    pub fn daemon_environment<I, K, V>(&self, base: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut environment: BTreeMap<String, String> = base
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        let redirects = [
            (CONFIG_DIR_VAR, self.config_dir.as_str()),
            (SCRIPT_ROOT_VAR, self.script_root.as_str()),
            (FILE_ROOT_VAR, self.file_root.as_str()),
            (HW_ROOT_VAR, self.hw_root.as_str()),
            (UPDATER_MODULE_VAR, self.updater_module.as_str()),
        ];
        for (key, value) in redirects {
            environment.insert(key.to_owned(), value.to_owned());
        }
        environment.extend(
            self.env_overrides
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        environment
    }
}
