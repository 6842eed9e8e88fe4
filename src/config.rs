//! Configuração do curator carregada a partir de `curator.toml`.
//!
//! A struct [`CuratorConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `CURATOR_ACCEPT_THRESHOLD` e
//! `CURATOR_MAX_ATTEMPTS` têm precedência sobre o arquivo.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CuratorError, Result};
use crate::scoring::{CriterionWeights, Keywords};

// Arquivo lido por [`CuratorConfig::load`].
const DEFAULT_PATH: &str = "curator.toml";

/// Configuração de nível superior carregada de `curator.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CuratorConfig {
    /// Pontuadores, limiares e política de fallback.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Regras do ciclo de vida dos candidatos.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Fila de retentativa para pontuações que falharam.
    #[serde(default)]
    pub retry_queue: RetryQueueConfig,

    /// Motor de pipelines e pool de workers.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// O que fazer com um item cuja pontuação primária falhou.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Usa o resultado do fallback determinístico e arquiva o item.
    #[default]
    Degrade,
    /// Coloca o item na fila de retentativa e tenta o pontuador primário depois.
    Enqueue,
}

/// Seção `[scoring]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Pontuação a partir da qual a recomendação é aprovar.
    #[serde(default = "default_approve_threshold")]
    pub approve_threshold: u8,

    /// Pontuação a partir da qual a recomendação é revisar.
    #[serde(default = "default_review_threshold")]
    pub review_threshold: u8,

    /// Itens por requisição de lote semântico.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tempo máximo, em segundos, de cada chamada ao adaptador de geração.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,

    /// Política aplicada quando a pontuação primária falha.
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,

    /// Pesos dos critérios do pontuador semântico.
    #[serde(default = "default_semantic_weights")]
    pub weights: BTreeMap<String, f64>,

    /// Pesos dos critérios do pontuador por palavras-chave.
    #[serde(default = "default_keyword_weights")]
    pub keyword_weights: BTreeMap<String, f64>,

    /// Palavras-chave primárias e secundárias.
    #[serde(default)]
    pub keywords: Keywords,
}

/// Seção `[lifecycle]`.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Pontuação agregada a partir da qual um candidato é arquivado como aceito.
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: u8,
}

/// Seção `[retry_queue]`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryQueueConfig {
    /// Tentativas antes de uma entrada ser marcada como esgotada.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Seção `[pipeline]`.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Orçamento de tempo de uma execução inteira, em segundos.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Tentativas por passo, contando a primeira.
    #[serde(default = "default_step_attempts")]
    pub step_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial entre tentativas.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Workers em segundo plano que consomem execuções assíncronas.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Falha a interpolação em caminhos não resolvidos em vez de renderizar "".
    #[serde(default)]
    pub strict_interpolation: bool,
}

// Valor padrão para o limiar de aprovação: 70.
fn default_approve_threshold() -> u8 {
    70
}

// Valor padrão para o limiar de revisão: 40.
fn default_review_threshold() -> u8 {
    40
}

// Valor padrão para o tamanho do lote: 5.
fn default_chunk_size() -> usize {
    5
}

// Valor padrão para o timeout do adaptador: 30s.
fn default_adapter_timeout_secs() -> u64 {
    30
}

// Pesos padrão: relevance 40, quality 25, novelty 20, credibility 15.
fn default_semantic_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("relevance".to_string(), 40.0),
        ("quality".to_string(), 25.0),
        ("novelty".to_string(), 20.0),
        ("credibility".to_string(), 15.0),
    ])
}

// Pesos padrão: keyword_relevance 50, freshness 25, content_quality 25.
fn default_keyword_weights() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("keyword_relevance".to_string(), 50.0),
        ("freshness".to_string(), 25.0),
        ("content_quality".to_string(), 25.0),
    ])
}

// Valor padrão para o limiar de aceite: 60.
fn default_accept_threshold() -> u8 {
    60
}

// Valor padrão para tentativas na fila: 3.
fn default_max_attempts() -> u32 {
    3
}

// Valor padrão para o orçamento de execução: 300s.
fn default_timeout_secs() -> u64 {
    300
}

// Valor padrão para tentativas por passo: 3.
fn default_step_attempts() -> u32 {
    3
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

// Valor padrão para o número de workers: 2.
fn default_workers() -> usize {
    2
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            approve_threshold: default_approve_threshold(),
            review_threshold: default_review_threshold(),
            chunk_size: default_chunk_size(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
            fallback_policy: FallbackPolicy::default(),
            weights: default_semantic_weights(),
            keyword_weights: default_keyword_weights(),
            keywords: Keywords::default(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
        }
    }
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            step_attempts: default_step_attempts(),
            base_delay_ms: default_base_delay_ms(),
            workers: default_workers(),
            strict_interpolation: false,
        }
    }
}

impl ScoringConfig {
    /// Timeout de cada chamada ao adaptador como [`Duration`].
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Pesos semânticos validados e normalizados.
    pub fn semantic_weights(&self) -> Result<CriterionWeights> {
        CriterionWeights::new(self.weights.clone())
    }

    /// Pesos do pontuador por palavras-chave, validados e normalizados.
    pub fn keyword_criterion_weights(&self) -> Result<CriterionWeights> {
        CriterionWeights::new(self.keyword_weights.clone())
    }
}

impl PipelineConfig {
    /// Orçamento de tempo como [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CuratorConfig {
    /// Carrega a configuração de `curator.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_PATH))
    }

    /// Carrega o arquivo informado, ou os valores padrão se ele não existir.
    /// Aplica as variáveis de ambiente e valida o resultado.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<CuratorConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(raw) = std::env::var("CURATOR_ACCEPT_THRESHOLD")
            && !raw.is_empty()
        {
            config.lifecycle.accept_threshold = raw
                .parse()
                .map_err(|_| CuratorError::Config(format!("bad CURATOR_ACCEPT_THRESHOLD: {raw}")))?;
        }
        if let Ok(raw) = std::env::var("CURATOR_MAX_ATTEMPTS")
            && !raw.is_empty()
        {
            config.retry_queue.max_attempts = raw
                .parse()
                .map_err(|_| CuratorError::Config(format!("bad CURATOR_MAX_ATTEMPTS: {raw}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Verifica limiares, pesos, tamanho de lote, tentativas e workers.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        if s.approve_threshold > 100 || s.review_threshold > 100 {
            return Err(CuratorError::Config("score thresholds must be within 0..=100".into()));
        }
        if s.review_threshold > s.approve_threshold {
            return Err(CuratorError::Config(
                "review_threshold must not exceed approve_threshold".into(),
            ));
        }
        if s.chunk_size == 0 {
            return Err(CuratorError::Config("chunk_size must be at least 1".into()));
        }
        if self.lifecycle.accept_threshold > 100 {
            return Err(CuratorError::Config("accept_threshold must be within 0..=100".into()));
        }
        if self.retry_queue.max_attempts == 0 {
            return Err(CuratorError::Config("max_attempts must be at least 1".into()));
        }
        if self.pipeline.workers == 0 {
            return Err(CuratorError::Config("pipeline.workers must be at least 1".into()));
        }
        if self.pipeline.step_attempts == 0 {
            return Err(CuratorError::Config("pipeline.step_attempts must be at least 1".into()));
        }
        s.semantic_weights()?;
        s.keyword_criterion_weights()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = CuratorConfig::default();
        assert_eq!(config.scoring.approve_threshold, 70);
        assert_eq!(config.scoring.chunk_size, 5);
        assert_eq!(config.scoring.fallback_policy, FallbackPolicy::Degrade);
        assert_eq!(config.lifecycle.accept_threshold, 60);
        assert_eq!(config.retry_queue.max_attempts, 3);
        assert_eq!(config.pipeline.base_delay_ms, 1000);
        assert!(!config.pipeline.strict_interpolation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            [scoring]
            chunk_size = 10
            fallback_policy = "enqueue"

            [scoring.keywords]
            primary = ["discovery"]

            [retry_queue]
            max_attempts = 5
        "#;
        let config: CuratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scoring.chunk_size, 10);
        assert_eq!(config.scoring.fallback_policy, FallbackPolicy::Enqueue);
        assert_eq!(config.scoring.keywords.primary, vec!["discovery".to_string()]);
        assert!(config.scoring.keywords.secondary.is_empty());
        assert_eq!(config.retry_queue.max_attempts, 5);
        assert_eq!(config.pipeline.timeout_secs, 300);
        assert_eq!(config.scoring.weights.len(), 4);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nworkers = 4\nstrict_interpolation = true").unwrap();
        let config = CuratorConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pipeline.workers, 4);
        assert!(config.pipeline.strict_interpolation);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CuratorConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pipeline.step_attempts, 3);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = CuratorConfig::default();
        config.scoring.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = CuratorConfig::default();
        config.scoring.review_threshold = 90;
        assert!(config.validate().is_err());

        let mut config = CuratorConfig::default();
        config.scoring.weights = BTreeMap::from([("relevance".to_string(), 0.0)]);
        assert!(config.validate().is_err());

        let mut config = CuratorConfig::default();
        config.retry_queue.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
