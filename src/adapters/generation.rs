//! Contrato dos adaptadores de geração de texto.
//!
//! Qualquer backend de geração (API de chat hospedada, servidor de modelo
//! local) se conecta implementando [`GenerationAdapter`]. Falhas de transporte
//! são reportadas como `AdapterUnavailable` (com `permanent` ligado para casos
//! como credenciais rejeitadas) e respostas inutilizáveis como
//! `MalformedResponse`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parâmetros de uma chamada de geração.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Nome do modelo específico do backend. `None` deixa o adaptador escolher.
    #[serde(default)]
    pub model: Option<String>,
    /// Número máximo de tokens na resposta.
    pub max_tokens: u32,
    /// Temperatura de amostragem; 0.0 para respostas determinísticas.
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

/// Estatísticas de uso de tokens de uma chamada.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Número de tokens de entrada consumidos.
    pub input_tokens: u32,
    /// Número de tokens de saída gerados.
    pub output_tokens: u32,
}

/// Resultado de uma geração bem-sucedida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Texto gerado pelo modelo.
    pub content: String,
    /// Uso de tokens; zerado quando o backend não informa.
    #[serde(default)]
    pub usage: Usage,
}

/// Backend de geração de texto usado pelo pontuador semântico.
///
/// Implementações de teste devolvem respostas fixas sem chamar a rede.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Gera uma resposta para um único prompt.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation>;

    /// Gera uma resposta a partir de um prompt de sistema e um de usuário.
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation>;
}

#[async_trait]
impl<T: GenerationAdapter + ?Sized> GenerationAdapter for Arc<T> {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        (**self).generate(prompt, options).await
    }

    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation> {
        (**self).chat(system_prompt, user_prompt, options).await
    }
}
