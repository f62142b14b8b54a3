use clap::Parser;

/// Runtime configuration, read from the environment (optionally a .env file)
/// or command-line flags.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Call-screening controller for the Asterisk REST Interface")]
pub struct Config {
    /// host:port of the Asterisk REST Interface
    #[clap(long, env = "AST_HOST")]
    pub ast_host: String,

    /// Base URL of the call authorization service
    #[clap(long, env = "SERVICE_HOST")]
    pub service_host: String,

    /// Stasis application name
    #[clap(long, env = "APP_NAME", default_value = "vouncer")]
    pub app_name: String,

    /// ARI API key, sent as the api_key query parameter on every request
    #[clap(long, env = "CREDENTIALS", default_value = "", hide_env_values = true)]
    pub credentials: String,

    /// Pretty-print every incoming event payload at debug level
    #[clap(long, env = "DEBUG")]
    pub debug: bool,

    /// Additional log level directive, e.g. "debug" or "vouncer=trace"
    #[clap(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}
