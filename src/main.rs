//! Butler 命令行
//!
//! `butler run "<goal>"`：用演示工具与配置中的 LLM（没有 Key 时用 Mock）规划并执行目标，
//! 打印过程事件、运行历史与最终状态；运行失败时退出码为 1。
//! 配置了 `calls.service_url` 时，计划中的 calling_agent 步骤通过 butler-calls 真实外呼。

use std::path::PathBuf;

use anyhow::Context;
use butler::core::{create_butler_builder, RunEvent};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "butler", version, about = "Plan and execute multi-step goals with automatic recovery")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 规划并执行一个目标
    Run {
        goal: String,
        /// 以 JSON 输出完整运行报告
        #[arg(long)]
        json: bool,
    },
    /// 列出已注册的工具
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    butler::observability::init();
    let cli = Cli::parse();
    let builder = create_butler_builder(cli.config).with_configured_calls();

    match cli.command {
        Command::Tools => {
            for (name, description) in builder.build_tool_registry().tool_descriptions() {
                println!("{name}\n    {description}");
            }
            Ok(())
        }
        Command::Run { goal, json } => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let coordinator = builder.with_events(tx).build_coordinator();

            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    print_event(&event);
                }
            });

            let report = coordinator.run_goal(&goal).await;
            drop(coordinator);
            printer.await.context("event printer panicked")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialize report")?
                );
            } else {
                println!("\n--- History ---");
                for entry in report.history.entries() {
                    println!("- {entry}");
                }
                match report.failure() {
                    None => println!("\nRun completed ({} steps executed)", report.executed.len()),
                    Some(f) => println!("\nRun failed: {f}"),
                }
            }

            if !report.is_completed() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::StepStarted { name, tool, .. } => println!("> {name} [{tool}]"),
        RunEvent::StepFinished {
            name,
            completed,
            preview,
            ..
        } => {
            let mark = if *completed { "ok" } else { "FAILED" };
            println!("  {mark}: {name}: {preview}");
        }
        RunEvent::RecoverySpliced { steps, .. } => {
            println!("  re-planned: {} recovery step(s) added", steps.len())
        }
        RunEvent::RunFinished { .. } => {}
    }
}
