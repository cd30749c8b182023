#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::type_complexity)]

/*
 * GNSS2JSONL converts GNSS receiver files (RINEX observations, NMEA logs
 * and other receiver formats) to JSONL location records.
 * This program is shipped under Mozilla Public V2 license.
 */

extern crate gnss_rs as gnss;

use std::{io::Read, sync::Arc};

use env_logger::{Builder, Target};

use log::{error, info, warn};

use tokio::signal;

mod classifier;
mod cli;
mod converter;
mod engine;
mod error;
mod extractor;
mod input;
mod model;
mod output;
mod pipeline;
mod record;
mod report;
mod task;
mod utils;
mod validator;

use crate::{
    classifier::{Classifier, Format},
    cli::Cli,
    engine::Engine,
    input::RawInput,
    model::ChatModel,
    pipeline::Pipeline,
    task::{Scheduler, TaskInput},
};

/// Standard input is uploaded as a whole
fn stdin_input(format: Option<Format>) -> std::io::Result<TaskInput> {
    let mut bytes = Vec::with_capacity(8192);
    std::io::stdin().read_to_end(&mut bytes)?;

    let raw = RawInput::from_bytes("stdin", bytes)?;
    Ok(TaskInput::Upload(raw.with_declared_format(format)))
}

#[tokio::main]
pub async fn main() {
    let mut builder = Builder::from_default_env();

    // stdout carries the task statuses
    builder
        .target(Target::Stderr)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    // cli
    let cli = Cli::new();

    let model_settings = cli.model_settings();
    let engine_settings = cli.engine_settings();

    if !engine_settings.no_llm && !model_settings.is_configured() {
        warn!("generative model is not configured: fallback attempts will fail");
    }

    let engine = Engine::new(engine_settings, Arc::new(ChatModel::new(model_settings)));
    let pipeline = Pipeline::new(Classifier::default(), engine);

    let mut scheduler = Scheduler::new(pipeline, cli.jobs());

    let output = cli.output_settings();
    let format = cli.format();

    let mut failures = 0;
    let mut tasks = Vec::new();

    for path in cli.filepaths() {
        let input = if path.as_os_str() == "-" {
            match stdin_input(format) {
                Ok(input) => input,
                Err(e) => {
                    error!("failed to read stdin: {}", e);
                    failures += 1;
                    continue;
                },
            }
        } else {
            TaskInput::Path {
                path: path.clone(),
                format,
            }
        };

        tasks.push(scheduler.submit(input, output.clone()));
    }

    info!("{} task(s) submitted", tasks.len());

    for task_id in tasks.iter() {
        let status = tokio::select! {
            status = scheduler.wait(task_id) => status,
            _ = signal::ctrl_c() => {
                warn!("interrupted: cancelling pending tasks");
                for id in tasks.iter() {
                    if let Some(current) = scheduler.status(id) {
                        info!(
                            "{} - {:?}, {} attempt event(s)",
                            id,
                            current.state,
                            current.events.len()
                        );
                    }
                }
                scheduler.cancel_all();
                scheduler.wait(task_id).await
            },
        };

        let Some(status) = status else {
            error!("{} - unknown task", task_id);
            failures += 1;
            continue;
        };

        if !status.succeeded() {
            failures += 1;
        }

        match serde_json::to_string(&status) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("{} - failed to serialize status: {}", task_id, e);
            },
        }
    }

    if failures > 0 {
        error!("{} input(s) did not succeed", failures);
        std::process::exit(1);
    }
}
