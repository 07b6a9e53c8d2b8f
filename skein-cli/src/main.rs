//! skein console binary: wires the Model Provider, Tool Gateway Client,
//! Prompt Store, and DAG Memory into a Core Agent, starts the Memory Agent
//! alongside it, then hands off to the console loop (spec §4, §6).

mod log_format;
mod logging;
mod repl;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use skein_core::llm::{GeminiProvider, ModelProvider, OpenAiProvider};
use skein_core::{AgentSettings, CoreAgent, DagMemory, GatewayClient, MemoryAgent, PromptStore};

#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(about = "skein — a bounded action-state-machine agent with branchable DAG memory")]
struct Args {
    /// Directory containing .env overrides for this run (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    working_dir: Option<std::path::PathBuf>,

    /// Directory of prompt overrides (default: built-in prompts; see PROMPTS_DIR)
    #[arg(long, value_name = "DIR")]
    prompts_dir: Option<std::path::PathBuf>,
}

/// Builds the Model Provider selected by `MODEL_PROVIDER` (`gemini` default, or `openai`).
fn build_model_provider() -> anyhow::Result<Arc<dyn ModelProvider>> {
    let provider = std::env::var("MODEL_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
    let model_name = std::env::var("MODEL_NAME").unwrap_or_else(|_| "gemini-1.5-flash".to_string());

    match provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(model_name))),
        _ => Ok(Arc::new(
            GeminiProvider::new(model_name).context("building Gemini model provider")?,
        )),
    }
}

fn build_prompt_store(args: &Args) -> PromptStore {
    match &args.prompts_dir {
        Some(dir) => PromptStore::with_override_dir(dir.clone()),
        None => PromptStore::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    skein_config::load_and_apply("skein", args.working_dir.as_deref()).ok();
    logging::init()
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("initializing logging")?;

    let settings = AgentSettings::from_env();
    let model = build_model_provider()?;
    let gateway = Arc::new(GatewayClient::new());
    let prompts = build_prompt_store(&args);
    let dag = DagMemory::new();

    let core_agent = CoreAgent::new(dag.clone(), model.clone(), gateway, prompts.clone(), settings);
    let memory_agent = MemoryAgent::new(dag, model, prompts, settings);

    let is_running = core_agent.is_running_flag();
    tokio::spawn(async move { memory_agent.run(is_running).await });

    repl::run_repl_loop(&core_agent).await.context("console loop")
}
