use std::path::PathBuf;

use crawlq_core::context::CrawlContext;
use crawlq_core::error::{Error, Result};
use crawlq_scheduler::{QueueKind, SchedulerConfig, DEFAULT_BROKER_URL};
use serde::de::DeserializeOwned;

use crate::settings::Settings;

/// Spider name used when `BOT_NAME` is not set
pub const DEFAULT_BOT_NAME: &str = "crawlq";

fn setting<T: DeserializeOwned>(settings: &Settings, key: &str) -> Result<Option<T>> {
    settings
        .get_opt(key)
        .map_err(|e| Error::config(e.to_string()))
}

/// Header names may be given as a list or as one comma-separated string
fn header_names(settings: &Settings) -> Result<Vec<String>> {
    const KEY: &str = "DUPEFILTER_INCLUDE_HEADERS";
    if let Ok(Some(list)) = settings.get_opt::<Vec<String>>(KEY) {
        return Ok(list);
    }
    Ok(setting::<String>(settings, KEY)?
        .map(|joined| {
            joined
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default())
}

/// Adapter function to create SchedulerConfig from Settings
pub fn scheduler_config_from_settings(settings: &Settings) -> Result<SchedulerConfig> {
    let jobdir = setting::<String>(settings, "JOBDIR")?
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from);

    let queue = match setting::<String>(settings, "SCHEDULER_QUEUE")? {
        Some(kind) => kind.parse::<QueueKind>()?,
        None if jobdir.is_some() => QueueKind::DiskFifo,
        None => QueueKind::MemoryFifo,
    };

    let config = SchedulerConfig {
        queue,
        jobdir,
        priority: setting(settings, "SCHEDULER_PRIORITY")?.unwrap_or(true),
        broker_url: setting(settings, "BROKER_URL")?
            .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string()),
        queue_name: setting(settings, "BROKER_QUEUE")?,
        route_by_callback: setting(settings, "BROKER_ROUTE_BY_CALLBACK")?.unwrap_or(false),
        dupefilter_debug: setting(settings, "DUPEFILTER_DEBUG")?.unwrap_or(false),
        include_headers: header_names(settings)?,
        log_unserializable: setting(settings, "LOG_UNSERIALIZABLE_REQUESTS")?.unwrap_or(false),
    };

    config.validate()?;
    Ok(config)
}

/// Adapter function to create the crawl context named by `BOT_NAME`
pub fn crawl_context_from_settings(settings: &Settings) -> Result<CrawlContext> {
    let name = setting::<String>(settings, "BOT_NAME")?
        .unwrap_or_else(|| DEFAULT_BOT_NAME.to_string());
    Ok(CrawlContext::new(name))
}
