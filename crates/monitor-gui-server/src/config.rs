use std::path::PathBuf;

use clap::Parser;
use monitor_gui_core::{IdentityResolver, DEFAULT_CERT_HEADER, DEFAULT_HOST_HEADER};

use crate::context::ServerSettings;

/// Configuration for the monitoring GUI session server.
#[derive(Parser, Debug, Clone)]
#[command(name = "monitor-gui-server")]
#[command(about = "Session lifecycle and dispatch server for the monitoring GUI")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "GUI_HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "8060", env = "GUI_PORT")]
    pub port: u16,

    /// URL prefix the server is mounted under behind the front-end proxy
    #[arg(long, default_value = "", env = "GUI_BASE_URL")]
    pub base_url: String,

    /// Page title
    #[arg(long, default_value = "Monitoring GUI", env = "GUI_TITLE")]
    pub title: String,

    /// State directory; sessions are kept under <dir>/sessions
    #[arg(long, default_value = "./gui-state", env = "GUI_SERVER_DIR")]
    pub server_dir: PathBuf,

    /// Header carrying the verified client certificate subject
    #[arg(long, default_value = DEFAULT_CERT_HEADER, env = "GUI_CERT_HEADER")]
    pub cert_header: String,

    /// Header carrying the console host name
    #[arg(long, default_value = DEFAULT_HOST_HEADER, env = "GUI_HOST_HEADER")]
    pub host_header: String,

    /// Workspaces to register, in order; the first is the default
    #[arg(long, default_value = "Summary", value_delimiter = ',', env = "GUI_WORKSPACES")]
    pub workspaces: Vec<String>,

    /// Instrumentation wrapper the server runs under (e.g. "igprof -pp")
    #[arg(long, env = "GUI_INSTRUMENT")]
    pub instrument: Option<String>,

    /// Host name shown on the session page
    #[arg(long, default_value = "localhost", env = "HOSTNAME")]
    pub hostname: String,
}

impl Config {
    pub fn session_dir(&self) -> PathBuf {
        self.server_dir.join("sessions")
    }

    pub fn settings(&self) -> ServerSettings {
        let mut settings = ServerSettings::new(self.session_dir());
        settings.title = self.title.clone();
        settings.base_url = self.base_url.trim_end_matches('/').to_string();
        settings.identity = IdentityResolver::new(&self.cert_header, &self.host_header);
        settings.instrument = self.instrument.clone().filter(|i| !i.is_empty());
        settings.hostname = self.hostname.clone();
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["monitor-gui-server"]).unwrap();
        assert_eq!(config.port, 8060);
        assert_eq!(config.workspaces, vec!["Summary".to_string()]);
        assert_eq!(config.session_dir(), PathBuf::from("./gui-state/sessions"));
    }

    #[test]
    fn test_settings() {
        let config = Config::try_parse_from([
            "monitor-gui-server",
            "--base-url",
            "/dqm/online/",
            "--workspaces",
            "Summary,Reports,Shift",
            "--instrument",
            "igprof -pp",
        ])
        .unwrap();
        assert_eq!(config.workspaces.len(), 3);

        let settings = config.settings();
        assert_eq!(settings.base_url, "/dqm/online");
        assert_eq!(settings.instrument.as_deref(), Some("igprof -pp"));
        assert_eq!(settings.session_dir, PathBuf::from("./gui-state/sessions"));
    }
}
