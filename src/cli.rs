//! Interface de linha de comando do jobline baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, resume, status)
//! e flags globais (--workers, --deadline-secs, --database, --yes, --no-retry, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobline — pipeline concorrente de jobs em três estágios com retentativas.
#[derive(Debug, Parser)]
#[command(name = "jobline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Número de workers por estágio (sobrepõe jobline.toml e WORKER_COUNT).
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Prazo global em segundos para toda a sequência de tentativas.
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Caminho do banco SQLite.
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Reprocessa falhas sem perguntar.
    #[arg(long, global = true, conflicts_with = "no_retry", default_value_t = false)]
    pub yes: bool,

    /// Nunca reprocessa falhas.
    #[arg(long, global = true, default_value_t = false)]
    pub no_retry: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Registra os jobs como `received` e executa o pipeline.
    Run {
        /// Caminho para um arquivo JSON ou TOML com as definições dos jobs.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Reexecuta os jobs marcados como `error` ou `timeout` no banco.
    Resume,

    /// Mostra o status de todos os jobs registrados.
    Status,
}

impl Cli {
    /// Decisão fixa do operador, se alguma flag foi informada.
    pub fn fixed_decision(&self) -> Option<bool> {
        if self.yes {
            Some(true)
        } else if self.no_retry {
            Some(false)
        } else {
            None
        }
    }
}
