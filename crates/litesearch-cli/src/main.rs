use anyhow::Result;
use clap::{Parser, Subcommand};
use litesearch_core::verify_index;
use litesearch_storage::{recover, Tables};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "litesearch")]
#[command(about = "Litesearch admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Rebuild state offline from the snapshot and WAL, and report on it
    Restore {
        data_dir: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Also write every document as JSON lines
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Check the field accounting of every index
    Verify { data_dir: PathBuf },
}

/// Names of indexes whose accounting does not match their documents.
fn inconsistent_indexes(tables: &Tables) -> Vec<String> {
    tables
        .indexes
        .values()
        .filter_map(|index| {
            match verify_index(index, tables.index_documents(&index.id)) {
                Ok(()) => None,
                Err(e) => {
                    eprintln!("{e}");
                    Some(index.id.clone())
                }
            }
        })
        .collect()
}

fn restore(data_dir: &Path, out: &Path, dump: Option<&Path>) -> Result<serde_json::Value> {
    let tables = recover(data_dir)?;
    if let Some(path) = dump {
        let mut s = String::new();
        for doc in tables.documents.values() {
            s.push_str(&serde_json::to_string(doc)?);
            s.push('\n');
        }
        std::fs::write(path, s)?;
    }
    let bad = inconsistent_indexes(&tables);
    let report = serde_json::json!({
        "last_seq": tables.commit_seq,
        "indexes": tables.indexes.len(),
        "documents": tables.documents.len(),
        "index_consistent": bad.is_empty(),
        "inconsistent_indexes": bad,
    });
    std::fs::write(out, serde_json::to_vec_pretty(&report)?)?;
    Ok(report)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Restore {
            data_dir,
            out,
            dump,
        } => {
            restore(&data_dir, &out, dump.as_deref())?;
        }
        Cmd::Verify { data_dir } => {
            let tables = recover(&data_dir)?;
            let bad = inconsistent_indexes(&tables);
            if !bad.is_empty() {
                anyhow::bail!("{} inconsistent index(es): {}", bad.len(), bad.join(", "));
            }
            println!(
                "{} indexes, {} documents, accounting consistent",
                tables.indexes.len(),
                tables.documents.len()
            );
        }
    }
    Ok(())
}
