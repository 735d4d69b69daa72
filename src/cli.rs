//! CLI argument definitions using clap derive macros.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::warn;
use url::Url;

use harvest_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use harvest_core::download::{ClientOptions, RetryPolicy};
use harvest_core::enumerator::{Credentials, DEFAULT_LISTING_PATH, SiteConfig};
use harvest_core::metadata::{CommentStyle, EmbedOptions};
use harvest_core::pipeline::{PipelineConfig, SessionSource};
use harvest_core::pool::{MAX_WORKERS, Throttle, WorkerConfig};
use harvest_core::resolver::RedirectStrategy;
use harvest_core::session::{SessionBundle, parse_netscape_cookies};

/// Environment variable read when the password is not given on the command line.
pub const PASSWORD_ENV: &str = "HARVEST_PASSWORD";

/// Default site root.
pub const DEFAULT_BASE_URL: &str = "https://m.facebook.com";

/// Download the photos and videos you are tagged in, with provenance metadata.
///
/// Arguments are positional in the order USERNAME DIRECTORY [PASSWORD]. The
/// password goes last so it can be left off the command line.
///
/// Files already present in DIRECTORY are never fetched again, so an
/// interrupted run can simply be restarted. Do not pass the password as an
/// argument; set HARVEST_PASSWORD instead (e.g. `read -s HARVEST_PASSWORD`).
#[derive(Parser)]
#[command(name = "tagged-harvest")]
#[command(author, version, about)]
pub struct Args {
    /// Account name to sign in with
    pub username: String,

    /// Existing directory to save media into
    #[arg(value_parser = existing_directory)]
    pub directory: PathBuf,

    /// Account password
    #[arg(env = PASSWORD_ENV, hide_env_values = true, required_unless_present = "cookies")]
    pub password: Option<String>,

    /// Number of concurrent workers (1-32)
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=MAX_WORKERS as i64))]
    pub workers: u8,

    /// Wait a random amount of time between requests
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub wait: bool,

    /// Listing offset to start from (resume a previous run)
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// How photo "view full size" links become asset URLs
    #[arg(long, value_enum, default_value_t = RedirectStrategy::Interstitial)]
    pub redirect_mode: RedirectStrategy,

    /// Also write a JSON descriptor next to each new file
    #[arg(long)]
    pub sidecar: bool,

    /// Layout of the embedded comment
    #[arg(long, value_enum, default_value_t = CommentStyle::Caption)]
    pub comment_style: CommentStyle,

    /// Maximum attempts per request (0 = retry transient failures forever)
    #[arg(short = 'r', long, default_value_t = 0)]
    pub max_retries: u32,

    /// Netscape cookie file to use instead of signing in
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Site root URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: Url,

    /// Listing path template with {user_id} and {offset} placeholders
    #[arg(long, default_value = DEFAULT_LISTING_PATH)]
    pub listing_path: String,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Seconds a transfer may stall without receiving data
    #[arg(long, default_value_t = READ_TIMEOUT_SECS)]
    pub read_timeout: u64,
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("username", &self.username)
            .field("directory", &self.directory)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("workers", &self.workers)
            .field("wait", &self.wait)
            .field("offset", &self.offset)
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .field("redirect_mode", &self.redirect_mode)
            .field("sidecar", &self.sidecar)
            .field("comment_style", &self.comment_style)
            .field("max_retries", &self.max_retries)
            .field("cookies", &self.cookies)
            .field("base_url", &self.base_url.as_str())
            .field("listing_path", &self.listing_path)
            .finish_non_exhaustive()
    }
}

impl Args {
    /// Builds the site layout for the enumerator.
    #[must_use]
    pub fn site_config(&self) -> SiteConfig {
        let mut site = SiteConfig::new(self.base_url.clone());
        site.listing_path.clone_from(&self.listing_path);
        site.client = ClientOptions::for_pages().with_timeouts(self.connect_timeout, self.read_timeout);
        site
    }

    /// Builds the run configuration.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let retry = match self.max_retries {
            0 => RetryPolicy::unbounded(),
            n => RetryPolicy::with_max_attempts(n),
        };
        let mut worker = WorkerConfig::new(self.directory.clone(), self.base_url.clone());
        worker.page_client =
            ClientOptions::for_pages().with_timeouts(self.connect_timeout, self.read_timeout);
        worker.asset_client =
            ClientOptions::default().with_timeouts(self.connect_timeout, self.read_timeout);
        worker.redirect = self.redirect_mode;
        worker.retry = retry;
        worker.embed = EmbedOptions {
            comment_style: self.comment_style,
        };
        worker.sidecar = self.sidecar;
        worker.throttle = if self.wait {
            Throttle::default()
        } else {
            Throttle::disabled()
        };

        PipelineConfig {
            workers: usize::from(self.workers),
            start_offset: self.offset,
            worker,
        }
    }

    /// Chooses the session source: a cookie file if given, else the credentials.
    ///
    /// # Errors
    ///
    /// Fails if the cookie file cannot be read or parsed, or if no password is available.
    pub fn session_source(&self) -> Result<SessionSource> {
        if let Some(path) = &self.cookies {
            let file = File::open(path)
                .with_context(|| format!("cannot open cookie file {}", path.display()))?;
            let parsed = parse_netscape_cookies(BufReader::new(file))
                .with_context(|| format!("cannot parse cookie file {}", path.display()))?;
            for (line, reason) in &parsed.warnings {
                warn!(line, reason = %reason, "skipped cookie line");
            }
            return Ok(SessionSource::Bundle(SessionBundle::new(parsed.cookies)));
        }
        match &self.password {
            Some(password) => Ok(SessionSource::Login(Credentials::new(
                self.username.clone(),
                password.clone(),
            ))),
            None => bail!("no password given; set {PASSWORD_ENV} or use --cookies"),
        }
    }
}

fn existing_directory(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("directory '{value}' does not exist"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn dir() -> tempfile::TempDir {
        tempfile::TempDir::new().unwrap()
    }

    fn parse(dir: &tempfile::TempDir, extra: &[&str]) -> Result<Args, clap::Error> {
        let dir = dir.path().to_str().unwrap();
        let mut argv = vec!["tagged-harvest", "jane", dir, "pw"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_cli_defaults() {
        let dir = dir();
        let args = parse(&dir, &[]).unwrap();
        assert_eq!(args.username, "jane");
        assert_eq!(args.password.as_deref(), Some("pw"));
        assert_eq!(args.workers, 1);
        assert!(args.wait);
        assert_eq!(args.offset, 0);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.redirect_mode, RedirectStrategy::Interstitial);
        assert_eq!(args.comment_style, CommentStyle::Caption);
        assert_eq!(args.max_retries, 0);
        assert_eq!(args.base_url.as_str(), "https://m.facebook.com/");
    }

    #[test]
    fn test_cli_missing_directory_rejected() {
        let result = Args::try_parse_from(["tagged-harvest", "jane", "/definitely/not/here", "pw"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_workers_range() {
        let dir = dir();
        assert_eq!(parse(&dir, &["-w", "8"]).unwrap().workers, 8);
        assert_eq!(
            parse(&dir, &["-w", "0"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
        assert_eq!(
            parse(&dir, &["--workers", "33"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_wait_toggle() {
        let dir = dir();
        let args = parse(&dir, &["--wait", "false"]).unwrap();
        assert!(!args.wait);
        assert!(args.pipeline_config().worker.throttle.is_disabled());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let dir = dir();
        assert_eq!(parse(&dir, &["-v"]).unwrap().verbose, 1);
        assert_eq!(parse(&dir, &["-vv"]).unwrap().verbose, 2);
    }

    #[test]
    fn test_cli_enum_options() {
        let dir = dir();
        let args = parse(&dir, &["--redirect-mode", "direct", "--comment-style", "attributed"]).unwrap();
        assert_eq!(args.redirect_mode, RedirectStrategy::Direct);
        assert_eq!(args.comment_style, CommentStyle::Attributed);
    }

    #[test]
    fn test_cli_pipeline_config_maps_options() {
        let dir = dir();
        let args = parse(&dir, &["-w", "4", "--offset", "40", "-r", "5", "--sidecar"]).unwrap();
        let config = args.pipeline_config();
        assert_eq!(config.workers, 4);
        assert_eq!(config.start_offset, 40);
        assert_eq!(config.worker.retry.max_attempts(), Some(5));
        assert!(config.worker.sidecar);
        assert_eq!(config.worker.output_dir, dir.path());
    }

    #[test]
    fn test_cli_zero_retries_is_unbounded() {
        let dir = dir();
        let config = parse(&dir, &[]).unwrap().pipeline_config();
        assert_eq!(config.worker.retry.max_attempts(), None);
    }

    #[test]
    fn test_cli_session_source_uses_credentials() {
        let dir = dir();
        let source = parse(&dir, &[]).unwrap().session_source().unwrap();
        assert!(matches!(source, SessionSource::Login(c) if c.username() == "jane"));
    }

    #[test]
    fn test_cli_cookie_file_replaces_password() {
        let dir = dir();
        let cookie_file = dir.path().join("cookies.txt");
        std::fs::write(&cookie_file, ".example.com\tTRUE\t/\tTRUE\t0\tc_user\t1000\n").unwrap();
        let args = Args::try_parse_from([
            "tagged-harvest",
            "jane",
            dir.path().to_str().unwrap(),
            "--cookies",
            cookie_file.to_str().unwrap(),
        ])
        .unwrap();
        let source = args.session_source().unwrap();
        assert!(matches!(source, SessionSource::Bundle(b) if b.get("c_user").is_some()));
    }

    #[test]
    fn test_cli_debug_redacts_password() {
        let dir = dir();
        let debug = format!("{:?}", parse(&dir, &[]).unwrap());
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"pw\""));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["tagged-harvest", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_long_help_states_positional_order() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("USERNAME DIRECTORY [PASSWORD]"));
        assert!(help.contains("HARVEST_PASSWORD"));
    }
}
