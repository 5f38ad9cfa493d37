mod cli;

use livesim::{
    analysis::ContentAnalyzer,
    config,
    streaming::{LiveSource, SegmentRequest},
    timing::LoopTimeMapper,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "livesim=trace,livesim_media=trace".to_string()
        } else {
            "livesim=info,livesim_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Analyze { representations } => {
            analyze(cli.config.as_deref(), &representations)
        }
        Commands::Segment {
            representation,
            number,
            mux,
            at,
            output,
        } => write_segment(
            cli.config.as_deref(),
            representation,
            number,
            mux,
            at.unwrap_or_else(now),
            &output,
        ),
        Commands::Window { at, json } => {
            print_window(cli.config.as_deref(), at.unwrap_or_else(now), json)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
    }
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn analyze(config_path: Option<&Path>, only: &[String]) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let analyzer = ContentAnalyzer::new(&config.content);

    for media in &config.media {
        for name in &media.representations {
            if !only.is_empty() && !only.contains(name) {
                continue;
            }
            let analysis = analyzer
                .analyze_and_write(name, media.timescale)
                .with_context(|| format!("Failed to analyze representation {name}"))?;
            println!(
                "{}: track {} timescale {} runs {} loop {} ticks",
                name,
                analysis.track.track_id,
                analysis.track.timescale,
                analysis.timeline.runs().len(),
                analysis.timeline.wrap_duration()
            );
        }
    }

    Ok(())
}

fn write_segment(
    config_path: Option<&Path>,
    representation: String,
    number: Option<u32>,
    mux: Option<String>,
    now: f64,
    output: &Path,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let source = Arc::new(LiveSource::from_config(&config)?);
    let options = source.default_options();

    let request = match (number, mux) {
        (None, None) => SegmentRequest::Init { representation },
        (None, Some(second)) => SegmentRequest::MuxedInit {
            first: representation,
            second,
        },
        (Some(number), None) => SegmentRequest::Media {
            representation,
            number,
        },
        (Some(number), Some(second)) => SegmentRequest::MuxedMedia {
            first: representation,
            second,
            number,
        },
    };

    let rt = tokio::runtime::Runtime::new()?;
    let data = rt.block_on(source.fetch(now, request, options))?;

    std::fs::write(output, &data)
        .with_context(|| format!("Failed to write segment: {:?}", output))?;
    println!("Wrote {} bytes to {}", data.len(), output.display());
    Ok(())
}

fn print_window(config_path: Option<&Path>, now: f64, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let window = LoopTimeMapper::from_config(&config).availability_window(now);
    let live = &config.live;

    if json {
        println!("{}", serde_json::to_string_pretty(&window)?);
        return Ok(());
    }

    println!("Availability start: {}", live.availability_start_time.to_rfc3339());
    match window.availability_end_time {
        Some(end) => println!("Availability end: {:.3}", end),
        None => println!("Availability end: none"),
    }
    if let Some(duration) = window.media_presentation_duration {
        println!("Presentation duration: {:.3}s", duration);
    }
    println!("Time-shift buffer: {}s", window.time_shift_buffer_depth_s);
    match (window.first_available, window.last_available) {
        (Some(first), Some(last)) => println!("Available segments: {}..={}", first, last),
        _ => println!("Available segments: none"),
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Content: {}", config.content.base_path.display());
            println!(
                "  Loop: {} segments of {}s from {}",
                config.content.nr_segments_in_loop,
                config.content.segment_duration_s,
                config.content.first_segment_in_loop
            );
            for media in &config.media {
                println!(
                    "  {:?}: timescale {} representations {}",
                    media.kind,
                    media.timescale,
                    media.representations.join(", ")
                );
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Content: {}", config.content.base_path.display());
        }
    }

    Ok(())
}
