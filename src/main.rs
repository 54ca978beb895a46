use framecache::cli::Args;
use framecache::config::CacheConfig;
use framecache::core::bus::MessageKind;
use framecache::core::clock::DisplayOpt;
use framecache::core::event::SeekEvent;
use framecache::core::frame_cache::FrameCache;
use framecache::paths::{self, PathConfig};
use framecache::sim::{CollectSink, SyntheticSource};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // Determine log level based on verbosity flags
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| paths::data_file("framecache.log", path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging with specified verbosity level (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;
    info!("framecache {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths::config_file("framecache.json", &path_config));
    let mut config = CacheConfig::load(&config_path)?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid cache settings")?;

    if args.write_config {
        config.save(&config_path)?;
        info!("Config written to {}", config_path.display());
    }

    let source = Arc::new(SyntheticSource::new(args.source_settings()));
    let sink = Arc::new(if args.realtime {
        CollectSink::realtime()
    } else {
        CollectSink::new()
    });
    let cache = FrameCache::new(config, source.clone(), sink.clone())?;

    cache.bus().subscribe(|message| match &message.kind {
        MessageKind::Error(e) => error!("Cache {}: {}", message.source, e),
        MessageKind::Warning(w) => warn!("Cache {}: {}", message.source, w),
        other => debug!("Cache {}: {:?}", message.source, other),
    });

    source
        .start(cache.sink())
        .context("Failed to start synthetic source")?;
    cache.start()?;

    let stop = args.seek_stop.map(framecache::ClockTime::from_seconds_f64);
    let play = Duration::from_secs_f64(args.play.max(0.0));

    for position in args.seek_positions() {
        let before = sink.served_count();
        cache
            .seek(&SeekEvent::new(position, stop))
            .with_context(|| format!("Seek to {} failed", position))?;
        std::thread::sleep(play);

        let (span_start, span_stop) = cache.span();
        println!(
            "seek {}: served {} frames, position {}, cached {} ({} bytes), span [{}, {})",
            position,
            sink.served_count() - before,
            cache.position(),
            cache.len(),
            cache.bytes(),
            DisplayOpt(span_start),
            DisplayOpt(span_stop)
        );
    }

    cache.stop();
    source.shutdown();

    let stats = cache.stats();
    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "served {} (hit rate {:.1}%), evicted {} ({} bytes), range requests {}, stale {}",
            stats.served,
            stats.hit_rate() * 100.0,
            stats.evicted,
            stats.evicted_bytes,
            stats.range_requests,
            stats.stale_requests
        );
    }

    Ok(())
}
