//! OpenStack connection parameters packed from settings

use std::fmt;

use serde::Serialize;

use super::{ConfigError, Settings};

/// Keystone credentials
#[derive(Clone, Serialize, PartialEq)]
pub struct AuthParams {
    pub auth_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_domain_name: Option<String>,
}

// Keep the password out of logs
impl fmt::Debug for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthParams")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("project_name", &self.project_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("user_domain_name", &self.user_domain_name)
            .finish()
    }
}

/// Everything needed to open an OpenStack session
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OpenStackParams {
    pub auth: AuthParams,
    pub region_name: Option<String>,
    pub ca_cert: Option<String>,
    pub insecure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Pack OpenStack parameters; the auth endpoint is mandatory
pub fn pack_openstack_params(settings: &Settings) -> Result<OpenStackParams, ConfigError> {
    let auth_url = settings
        .os_auth_url
        .clone()
        .ok_or_else(|| ConfigError::ConfigurationMissing("OS_AUTH_URL".to_string()))?;

    Ok(OpenStackParams {
        auth: AuthParams {
            auth_url,
            username: settings.os_username.clone(),
            password: settings.os_password.clone(),
            project_name: settings.os_project_name.clone(),
            project_domain_name: settings.os_project_domain_name.clone(),
            user_domain_name: settings.os_user_domain_name.clone(),
        },
        region_name: settings.os_region_name.clone(),
        ca_cert: settings.os_ca_cert.clone(),
        insecure: settings.os_insecure,
        interface: settings.os_interface.clone(),
        identity_api_version: settings.os_api_version.clone(),
        profile: settings.os_profile.clone(),
    })
}
