use clap::Parser;

#[derive(Parser)]
#[command(name = "ag2api")]
pub(crate) struct Cli {
    #[arg(long, env = "AG2API_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "AG2API_PORT")]
    pub(crate) port: Option<u16>,
    #[arg(long, env = "AG2API_DEBUG")]
    pub(crate) debug: bool,
    #[arg(long, env = "AG2API_PROXY_URL")]
    pub(crate) proxy_url: Option<String>,
}

impl Cli {
    /// Flags win over whatever `Config::load` already resolved from
    /// `config.json` / environment, since they're the most specific source.
    pub(crate) fn apply(self, config: &mut ag2_core::config::Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(proxy_url) = self.proxy_url {
            config.proxy_enabled = true;
            config.proxy_url = Some(proxy_url);
        }
    }
}
