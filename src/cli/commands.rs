//! Implementação dos comandos CLI do cachefield.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::dispatcher::Sweeper;
use crate::field::{schemas_from_config, KindSchema};
use crate::queue::SqliteQueue;
use crate::store::SqliteStore;
use crate::types::config::Config;
use crate::CacheFieldResult;

/// Initializes configuration in the specified directory.
pub async fn init(path: Option<PathBuf>) -> CacheFieldResult<()> {
    let target_dir = path.unwrap_or_else(|| PathBuf::from("."));

    // Create directory if it doesn't exist
    if !target_dir.exists() {
        std::fs::create_dir_all(&target_dir)?;
        tracing::info!("Directory created: {}", target_dir.display());
    }

    let config_path = target_dir.join("cachefield.toml");

    if config_path.exists() {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use 'cachefield doctor' to check it.");
        return Ok(());
    }

    let data_dir = target_dir.join(".cachefield");
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!(".cachefield/ directory created");
    }

    update_gitignore(&target_dir)?;

    let config = Config::default_config();
    config.save(&config_path)?;

    println!("cachefield initialized successfully!");
    println!("Configuration created at: {}", config_path.display());
    println!("Data directory: .cachefield/");
    println!();
    println!("Next steps:");
    println!("  1. Declare your record kinds under [[kinds]] in cachefield.toml");
    println!("  2. Create the cache columns: cachefield migrate");
    println!("  3. Check everything: cachefield doctor");

    Ok(())
}

/// Updates or creates .gitignore to include .cachefield/
fn update_gitignore(target_dir: &Path) -> CacheFieldResult<()> {
    let gitignore_path = target_dir.join(".gitignore");
    let entry = ".cachefield/";
    let comment = "# cachefield - local database and job queue";

    if gitignore_path.exists() {
        let content = std::fs::read_to_string(&gitignore_path)?;

        if content
            .lines()
            .any(|line| line.trim() == entry || line.trim() == ".cachefield")
        {
            tracing::debug!(".gitignore already contains .cachefield/");
            return Ok(());
        }

        let mut new_content = content.trim_end().to_string();
        if !new_content.is_empty() {
            new_content.push_str("\n\n");
        }
        new_content.push_str(comment);
        new_content.push('\n');
        new_content.push_str(entry);
        new_content.push('\n');

        std::fs::write(&gitignore_path, new_content)?;
        println!(".gitignore updated with .cachefield/");
    } else {
        std::fs::write(&gitignore_path, format!("{}\n{}\n", comment, entry))?;
        println!(".gitignore created with .cachefield/");
    }

    Ok(())
}

fn ensure_data_dir(config: &Config) -> CacheFieldResult<()> {
    if let Some(parent) = config.store.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn open_store(config: &Config) -> CacheFieldResult<SqliteStore> {
    ensure_data_dir(config)?;
    SqliteStore::open(&config.store.db_path)
}

fn open_queue(config: &Config) -> CacheFieldResult<SqliteQueue> {
    ensure_data_dir(config)?;
    SqliteQueue::open(
        &config.store.db_path,
        Duration::from_secs(config.queue.visibility_timeout_secs),
    )
}

fn load_schemas(config: &Config) -> CacheFieldResult<Vec<KindSchema>> {
    let schemas = schemas_from_config(config)?;
    if schemas.is_empty() {
        println!("Nenhum tipo declarado em [[kinds]].");
    }
    Ok(schemas)
}

/// Cria tabelas e colunas de cache que faltam.
pub async fn migrate(config: &Config) -> CacheFieldResult<()> {
    let schemas = load_schemas(config)?;
    if schemas.is_empty() {
        return Ok(());
    }

    let store = open_store(config)?;
    // Cria também a tabela da fila.
    open_queue(config)?;

    for schema in &schemas {
        let added = store.ensure_schema(schema).await?;
        if added.is_empty() {
            println!("✓ {} ({}) - esquema em dia", schema.id(), schema.table());
        } else {
            println!(
                "✓ {} ({}) - colunas adicionadas: {}",
                schema.id(),
                schema.table(),
                added.join(", ")
            );
        }
    }

    println!();
    println!("Banco: {}", config.store.db_path.display());

    Ok(())
}

/// Diagnostica problemas de configuração e esquema.
pub async fn doctor(config: &Config) -> CacheFieldResult<()> {
    println!("Diagnosticando configuração do cachefield...\n");

    let mut issues: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    println!("✓ Configuração carregada");

    let schemas = match schemas_from_config(config) {
        Ok(schemas) => schemas,
        Err(e) => {
            issues.push(format!("Tipos inválidos: {}", e));
            Vec::new()
        }
    };

    if config.kinds.is_empty() {
        warnings.push("Nenhum tipo declarado em [[kinds]]".to_string());
    }

    if config.queue.concurrency == 0 {
        warnings.push("queue.concurrency = 0; o worker usará 1".to_string());
    }
    if config.queue.max_attempts == 0 {
        warnings.push("queue.max_attempts = 0; o worker usará 1".to_string());
    }

    if !schemas.is_empty() {
        if config.store.db_path.exists() {
            let store = SqliteStore::open(&config.store.db_path)?;
            for schema in &schemas {
                if !store.table_exists(schema).await? {
                    issues.push(format!(
                        "Tabela '{}' de {} não existe - execute 'cachefield migrate'",
                        schema.table(),
                        schema.id()
                    ));
                    continue;
                }

                let missing = store.missing_columns(schema).await?;
                if missing.is_empty() {
                    println!("✓ {} ({}) - esquema completo", schema.id(), schema.table());
                } else {
                    issues.push(format!(
                        "{} sem colunas: {} - execute 'cachefield migrate'",
                        schema.id(),
                        missing.join(", ")
                    ));
                }
            }
        } else {
            issues.push(format!(
                "Banco {} não existe - execute 'cachefield migrate'",
                config.store.db_path.display()
            ));
        }
    }

    println!();
    if issues.is_empty() && warnings.is_empty() {
        println!("✓ Tudo OK! cachefield está pronto para uso.");
    } else {
        if !warnings.is_empty() {
            println!("Avisos:");
            for warning in warnings {
                println!("  ⚠ {}", warning);
            }
        }
        if !issues.is_empty() {
            println!("Problemas:");
            for issue in issues {
                println!("  ✗ {}", issue);
            }
        }
    }

    Ok(())
}

/// Mostra staleness por tipo e atributo.
pub async fn status(config: &Config) -> CacheFieldResult<()> {
    let schemas = load_schemas(config)?;
    if schemas.is_empty() {
        return Ok(());
    }

    if !config.store.db_path.exists() {
        println!(
            "Banco {} ainda não foi criado. Execute 'cachefield migrate'.",
            config.store.db_path.display()
        );
        return Ok(());
    }

    let store = open_store(config)?;
    let now = Utc::now();

    for schema in &schemas {
        if !store.table_exists(schema).await? {
            println!("○ {} ({}) - tabela ausente", schema.id(), schema.table());
            continue;
        }

        let total = store.count(schema).await?;
        println!("{} ({}) - {} registros", schema.id(), schema.table(), total);

        for stats in store.attribute_stats(schema, now).await? {
            let icon = if stats.stale == 0 && stats.expired == 0 {
                "✓"
            } else {
                "⚠"
            };
            println!(
                "  {} {}: {} stale, {} sem valor, {} expirados",
                icon, stats.attribute, stats.stale, stats.missing, stats.expired
            );
        }
    }

    let queue = open_queue(config)?;
    println!();
    println!("Jobs na fila: {}", queue.len().await?);

    Ok(())
}

/// Enfileira um job por registro stale na fila durável.
pub async fn sweep(config: &Config, include_expired: bool) -> CacheFieldResult<()> {
    let schemas = load_schemas(config)?;
    if schemas.is_empty() {
        return Ok(());
    }

    let store = Arc::new(open_store(config)?);
    let queue = Arc::new(open_queue(config)?);

    let mut present = Vec::new();
    for schema in schemas {
        if store.table_exists(&schema).await? {
            present.push(schema);
        } else {
            println!("○ {} ({}) - tabela ausente, ignorado", schema.id(), schema.table());
        }
    }

    let report = Sweeper::new(store, queue)
        .include_expired(include_expired)
        .sweep(&present)
        .await?;

    println!("Tipos varridos: {}", report.kinds);
    if include_expired {
        println!("Atributos expirados marcados: {}", report.flagged_expired);
    }
    println!("Jobs enfileirados: {}", report.enqueued);

    Ok(())
}

/// Lista jobs pendentes.
pub async fn jobs(config: &Config, limit: usize) -> CacheFieldResult<()> {
    if !config.store.db_path.exists() {
        println!("Nenhum job pendente.");
        return Ok(());
    }

    let queue = open_queue(config)?;
    let pending = queue.pending(limit).await?;
    if pending.is_empty() {
        println!("Nenhum job pendente.");
        return Ok(());
    }

    println!("Jobs pendentes ({} de {}):", pending.len(), queue.len().await?);
    for queued in pending {
        println!(
            "  #{} {}.{} id={} tentativas={} visível em {}",
            queued.id,
            queued.job.store_kind,
            queued.job.record_kind,
            queued.job.record_id,
            queued.attempts,
            queued.visible_at
        );
    }

    Ok(())
}

/// Mostra versão.
pub fn version() {
    println!("cachefield {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Atributos cacheados com staleness e recálculo diferido");
}
