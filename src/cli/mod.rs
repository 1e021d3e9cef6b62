//! Interface de linha de comando do cachefield.
//!
//! Os comandos trabalham sobre o banco SQLite configurado e os tipos
//! declarados em `[[kinds]]`. Recalcular exige os métodos de cálculo, que
//! só existem na aplicação; por isso a CLI não roda o worker.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cachefield - atributos cacheados com staleness e recálculo diferido.
#[derive(Parser, Debug)]
#[command(name = "cachefield")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Arquivo de configuração.
    #[arg(short, long, default_value = "cachefield.toml")]
    pub config: PathBuf,

    /// Modo verbose.
    #[arg(short, long)]
    pub verbose: bool,

    /// Modo silencioso.
    #[arg(short, long)]
    pub quiet: bool,

    /// Comando a executar.
    #[command(subcommand)]
    pub command: Commands,
}

/// Comandos disponíveis.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inicializa configuração no diretório atual.
    Init {
        /// Diretório de destino (padrão: diretório atual).
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Cria tabelas e colunas de cache que faltam.
    Migrate,

    /// Diagnostica configuração e esquema.
    Doctor,

    /// Mostra staleness por tipo e atributo.
    Status,

    /// Enfileira um job por registro stale.
    Sweep {
        /// Também marca e enfileira atributos com expiração vencida.
        #[arg(long)]
        include_expired: bool,
    },

    /// Lista jobs pendentes na fila.
    Jobs {
        /// Número máximo de jobs listados.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Mostra versão.
    Version,
}
