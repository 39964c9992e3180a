//! Configuração do pipeline carregada a partir de `jobline.toml`.
//!
//! A struct [`PipelineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `WORKER_COUNT` tem precedência sobre o arquivo, e as
//! flags da CLI têm precedência sobre ambos.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "jobline.toml";

/// Configuração de nível superior carregada de `jobline.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    /// Número de workers em cada um dos três pools.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Prazo global, em segundos, para toda a sequência de tentativas.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Caminho do banco SQLite com os registros dos jobs.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Tempo limite de cada requisição HTTP.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Orçamento de tempo de cada escrita no banco.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Probabilidade de falha do processamento simulado.
    #[serde(default = "default_process_failure_rate")]
    pub process_failure_rate: f64,
}

// Valor padrão de workers por pool: 3.
fn default_worker_count() -> usize {
    3
}

// Valor padrão do prazo global: 180s.
fn default_deadline_secs() -> u64 {
    180
}

fn default_database_path() -> PathBuf {
    PathBuf::from("jobs.db")
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_store_timeout_ms() -> u64 {
    5000
}

// Metade dos jobs falha no processamento simulado.
fn default_process_failure_rate() -> f64 {
    0.5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            deadline_secs: default_deadline_secs(),
            database_path: default_database_path(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            process_failure_rate: default_process_failure_rate(),
        }
    }
}

impl PipelineConfig {
    /// Carrega a configuração de `jobline.toml` no diretório atual e aplica
    /// `WORKER_COUNT`. Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new(CONFIG_FILE))?;
        config.apply_worker_count_env(std::env::var("WORKER_COUNT").ok().as_deref());
        Ok(config)
    }

    /// Carrega de um caminho explícito; arquivo ausente significa defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<PipelineConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.normalize();
        Ok(config)
    }

    /// Aplica o valor de `WORKER_COUNT`. Valor inválido ou zero volta ao padrão.
    pub fn apply_worker_count_env(&mut self, value: Option<&str>) {
        let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
            return;
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => self.worker_count = n,
            _ => {
                warn!(value = raw, default = default_worker_count(), "invalid WORKER_COUNT, using default");
                self.worker_count = default_worker_count();
            }
        }
    }

    // Garante que o número de workers seja positivo.
    fn normalize(&mut self) {
        if self.worker_count == 0 {
            warn!(default = default_worker_count(), "worker_count must be positive, using default");
            self.worker_count = default_worker_count();
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.max(1))
    }
}
