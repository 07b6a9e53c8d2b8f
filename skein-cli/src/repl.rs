//! Interactive console loop: read stdin, run one Core Agent step, print the
//! reply, repeat until EOF or `exit` (spec §4.G "Console loop" / §6).
//!
//! `exit` is the only recognized terminator. It dumps the full action DAG
//! context to a timestamped file before the process ends, so a session can
//! be inspected after the fact.

use std::io::Write;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};

use skein_core::CoreAgent;

/// Runs the console loop against `agent` until EOF or `exit`.
pub async fn run_repl_loop(agent: &CoreAgent) -> anyhow::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = match reader.next_line().await? {
            None => break,
            Some(s) if s.trim().is_empty() => continue,
            Some(s) => s,
        };

        if line.trim() == "exit" {
            dump_context_and_exit(agent)?;
            break;
        }

        match agent.run_step(&line).await {
            Ok(Some(reply)) => println!("{}", reply),
            Ok(None) => {
                // Budget exhausted or the step never reached AGENT_RESPONSE.
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    agent.shutdown();
    Ok(())
}

/// Writes `agent`'s full context to `agent_context_YYYYMMDD_HHMMSS.txt` in
/// the current directory (spec §6).
fn dump_context_and_exit(agent: &CoreAgent) -> anyhow::Result<()> {
    let context = agent.dag().get_context();
    let filename = format!("agent_context_{}.txt", Utc::now().format("%Y%m%d_%H%M%S"));
    std::fs::write(&filename, context)?;
    println!("wrote {}", filename);
    Ok(())
}
