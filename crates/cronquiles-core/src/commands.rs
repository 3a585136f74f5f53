use std::io::Write;

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::app::App;
use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::YearMonth;
use crate::i18n::Locale;
use crate::render::Renderer;

const DEFAULT_LIST_MONTHS: usize = 3;
const DEFAULT_UPCOMING_LIMIT: usize = 5;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "month",
        "list",
        "grid",
        "upcoming",
        "regions",
        "communities",
        "links",
        "set",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(app, cfg, renderer, inv, out))]
pub async fn dispatch<W: Write>(
    app: &mut App,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
    out: &mut W,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "month" => cmd_month(app, renderer, &inv.command_args, out).await,
        "list" => cmd_list(app, renderer, &inv.command_args, out).await,
        "grid" => cmd_grid(app, renderer, &inv.command_args, out).await,
        "upcoming" => cmd_upcoming(app, renderer, &inv.command_args, out).await,
        "regions" => cmd_regions(app, renderer, out),
        "communities" => cmd_communities(app, renderer, out),
        "links" => cmd_links(app, renderer, out).await,
        "set" => cmd_set(app, renderer, &inv.command_args, out).await,
        "_commands" => cmd_commands(out),
        "_show" => cmd_show(cfg, out),
        "help" => cmd_help(out),
        "version" => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// `YYYY-MM`, `prev`, `next` or `today` moves the viewed month.
async fn apply_month_arg(app: &mut App, arg: Option<&String>) -> anyhow::Result<()> {
    let Some(arg) = arg else {
        return Ok(());
    };
    match arg.as_str() {
        "prev" => app.navigate(-1).await,
        "next" => app.navigate(1).await,
        "today" => app.go_to_today().await,
        raw => {
            let month = raw
                .parse::<YearMonth>()
                .map_err(|e| anyhow!("invalid month {raw}: {e}"))?;
            app.set_view_month(month).await
        }
    }
}

/// Prints the failure banner when no calendar could be loaded.
fn report_missing<W: Write>(app: &App, renderer: &Renderer, out: &mut W) -> anyhow::Result<()> {
    match app.last_failure() {
        Some(failure) => renderer.write_failure(out, failure),
        None => {
            writeln!(out, "{}", app.settings().locale.t("error.loading"))?;
            Ok(())
        }
    }
}

#[instrument(skip(app, renderer, args, out))]
async fn cmd_month<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command month");
    apply_month_arg(app, args.first()).await?;

    if let Some(failure) = app.last_failure()
        && app.session().is_some()
    {
        renderer.write_failure(out, failure)?;
    }
    let Some(view) = app.view() else {
        return report_missing(app, renderer, out);
    };
    renderer.write_calendar(out, &view)
}

#[instrument(skip(app, renderer, args, out))]
async fn cmd_grid<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command grid");
    apply_month_arg(app, args.first()).await?;

    let Some(view) = app.view() else {
        return report_missing(app, renderer, out);
    };
    if view.feed_is_empty {
        writeln!(out, "{}", view.settings.locale.t("calendar.empty"))?;
        return Ok(());
    }
    renderer.write_grid(out, &view)
}

#[instrument(skip(app, renderer, args, out))]
async fn cmd_list<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command list");
    let mut month_arg = None;
    let mut months = DEFAULT_LIST_MONTHS;
    for arg in args {
        if let Ok(count) = arg.parse::<usize>() {
            months = count.max(1);
        } else {
            month_arg = Some(arg);
        }
    }
    apply_month_arg(app, month_arg).await?;

    if app.session().is_none() {
        return report_missing(app, renderer, out);
    }

    let mut disclosed = 1;
    while disclosed < months {
        if app.load_more().is_none() {
            break;
        }
        disclosed += 1;
    }
    debug!(disclosed, "months disclosed");

    let Some(view) = app.view() else {
        return report_missing(app, renderer, out);
    };
    let locale = view.settings.locale;
    if view.feed_is_empty {
        writeln!(out, "{}", locale.t("calendar.empty"))?;
        return Ok(());
    }
    for section in &view.sections {
        renderer.write_section(out, section, locale)?;
    }
    if view.has_more {
        writeln!(out, "{}", locale.t("cal.loadMore"))?;
    }
    Ok(())
}

#[instrument(skip(app, renderer, args, out))]
async fn cmd_upcoming<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command upcoming");
    let mut month_arg = None;
    let mut limit = DEFAULT_UPCOMING_LIMIT;
    for arg in args {
        if let Ok(count) = arg.parse::<usize>() {
            limit = count;
        } else {
            month_arg = Some(arg);
        }
    }
    apply_month_arg(app, month_arg).await?;

    let locale = app.settings().locale;
    let Some(session) = app.session() else {
        return report_missing(app, renderer, out);
    };
    renderer.write_upcoming(out, &session.upcoming(limit), locale)
}

fn cmd_regions<W: Write>(app: &App, renderer: &Renderer, out: &mut W) -> anyhow::Result<()> {
    let regions = app.visible_regions();
    if regions.is_empty() {
        warn!("no region metadata available");
    }
    renderer.write_regions(out, &regions, &app.city(), app.settings().locale)
}

fn cmd_communities<W: Write>(app: &App, renderer: &Renderer, out: &mut W) -> anyhow::Result<()> {
    let Some(session) = app.session() else {
        return report_missing(app, renderer, out);
    };
    renderer.write_communities(out, session.communities(), app.settings().locale)
}

async fn cmd_links<W: Write>(app: &App, renderer: &Renderer, out: &mut W) -> anyhow::Result<()> {
    let links = app.links()?;
    let last_modified = app.last_modified().await;
    renderer.write_links(out, &links, last_modified, app.settings().locale)?;
    if let Some(url) = app.page_url() {
        writeln!(out, "{url}")?;
    }
    Ok(())
}

/// `set city <slug>`, `set lang <es|en>`, `set past <on|off>`.
#[instrument(skip(app, renderer, args, out))]
async fn cmd_set<W: Write>(
    app: &mut App,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    let (Some(key), Some(value)) = (args.first(), args.get(1)) else {
        return Err(anyhow!("usage: set <city|lang|past> <value>"));
    };
    info!(key = %key, value = %value, "command set");

    match key.as_str() {
        "city" => {
            let slug = value.trim().to_ascii_lowercase();
            if slug.is_empty() {
                return Err(anyhow!("city cannot be empty"));
            }
            app.select_city(&slug).await?;
        }
        "lang" => {
            let locale = value.parse::<Locale>()?;
            app.select_locale(locale).await?;
        }
        "past" => {
            let show = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "y" | "yes" | "on" | "true" => true,
                "0" | "n" | "no" | "off" | "false" => false,
                other => return Err(anyhow!("expected on/off, got: {other}")),
            };
            app.set_show_past(show).await?;
        }
        other => return Err(anyhow!("unknown setting: {other}")),
    }

    if let Some(failure) = app.last_failure() {
        renderer.write_failure(out, failure)?;
    }
    let settings = app.settings();
    writeln!(
        out,
        "city={} lang={} past={}",
        app.city(),
        settings.locale,
        if settings.show_past_events { "on" } else { "off" }
    )?;
    Ok(())
}

fn cmd_commands<W: Write>(out: &mut W) -> anyhow::Result<()> {
    for command in known_command_names() {
        writeln!(out, "{command}")?;
    }
    Ok(())
}

fn cmd_show<W: Write>(cfg: &Config, out: &mut W) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        writeln!(out, "{k}={v}")?;
    }
    Ok(())
}

fn cmd_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "Commands: month [YYYY-MM|prev|next|today], list [YYYY-MM] [months], grid [YYYY-MM], upcoming [YYYY-MM] [limit], regions, communities, links, set <city|lang|past> <value>"
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{expand_command_abbrev, known_command_names};

    #[test]
    fn expands_unique_prefixes_only() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("mo", &known), Some("month"));
        assert_eq!(expand_command_abbrev("up", &known), Some("upcoming"));
        assert_eq!(expand_command_abbrev("links", &known), Some("links"));
        assert_eq!(expand_command_abbrev("li", &known), None);
        assert_eq!(expand_command_abbrev("zzz", &known), None);
    }
}
