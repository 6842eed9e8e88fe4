//! Interface de linha de comando do curator baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (score, run, demo)
//! e flags globais (--config, --policy, --max-attempts, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use curator::config::FallbackPolicy;

/// curator: pontuação, ciclo de vida e pipelines de curadoria de conteúdo.
#[derive(Debug, Parser)]
#[command(name = "curator", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração. Usa ./curator.toml quando existir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// O que fazer quando a pontuação primária falha.
    #[arg(long, global = true)]
    pub policy: Option<PolicyArg>,

    /// Tentativas na fila de retentativa antes de aposentar uma entrada.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Habilita logs em nível debug (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Política aceita pela CLI, mapeada para [`FallbackPolicy`] internamente.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PolicyArg {
    /// Pontua com o fallback por palavras-chave e marca o resultado como degradado.
    Degrade,
    /// Mantém o item como candidato e o coloca na fila de retentativa.
    Enqueue,
}

impl From<PolicyArg> for FallbackPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Degrade => FallbackPolicy::Degrade,
            PolicyArg::Enqueue => FallbackPolicy::Enqueue,
        }
    }
}

/// Subcomandos disponíveis.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ranqueia os itens de um arquivo JSON com o pontuador por palavras-chave.
    Score {
        /// Array JSON de itens (`title`, `url`, `body` e `published_at` opcionais).
        items: PathBuf,

        /// Palavras-chave primárias, separadas por vírgula. Sobrescreve o arquivo de configuração.
        #[arg(long, value_delimiter = ',')]
        primary: Vec<String>,

        /// Palavras-chave secundárias, separadas por vírgula. Sobrescreve o arquivo de configuração.
        #[arg(long, value_delimiter = ',')]
        secondary: Vec<String>,
    },

    /// Executa uma definição de pipeline de forma síncrona.
    Run {
        /// Arquivo do pipeline, `.json` ou `.toml`.
        pipeline: PathBuf,

        /// Payload inicial como JSON inline.
        #[arg(long)]
        payload: Option<String>,
    },

    /// Demonstração em memória: ingestão, pontuação, aprovação e publicação.
    Demo,
}
