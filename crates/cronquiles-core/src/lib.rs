pub mod app;
pub mod bucket;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod event;
pub mod feed;
pub mod filter;
pub mod grid;
pub mod i18n;
pub mod normalize;
pub mod pagination;
pub mod render;
pub mod session;
pub mod storage;
pub mod store;

use std::ffi::OsString;
use std::io::Write;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};
use url::Url;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting cronquiles CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rcfile.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let prefs =
    storage::PreferenceStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open preferences at \
         {}",
        data_dir.display()
      )
    })?;

  let base = feed::FeedBase::parse(
    &cfg.feed_base()
  )
  .context("invalid feed.base")?;
  let client = feed::FeedClient::new(
    base,
    cfg.feed_timeout()
  )?;

  let now = match cli.now.as_deref() {
    | Some(expr) => {
      datetime::parse_now_expr(
        expr,
        Utc::now()
      )?
    }
    | None => Utc::now()
  };

  let page_url = cli
    .url
    .as_deref()
    .map(Url::parse)
    .transpose()
    .context("invalid --url")?;
  let url_params = page_url
    .as_ref()
    .map(app::LaunchParams::from_url)
    .unwrap_or_default();
  let flag_params = app::LaunchParams {
    city: cli.city.clone(),
    lang: cli
      .lang
      .as_deref()
      .map(str::parse::<i18n::Locale>)
      .transpose()?
  };
  let params =
    url_params.merged_with(flag_params);

  let defaults = app::Defaults {
    city:             cfg.default_city(),
    locale:           cfg.default_locale(),
    show_past_events: cfg.show_past()
      || cli.past
  };

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    let mut app = app::App::start(
      prefs, client, defaults, params,
      page_url, now
    )
    .await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::dispatch(
      &mut app, &cfg, &renderer, inv,
      &mut out
    )
    .await?;
    out.flush()?;
    app.unbind();
    anyhow::Ok(())
  })?;

  info!("done");
  Ok(())
}
