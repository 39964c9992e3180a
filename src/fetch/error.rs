//! Tipos de erro para o cliente de busca remota.
//!
//! Define [`FetchError`] com variantes para respostas HTTP de erro, estouro de
//! tempo e falhas de rede. Usa `thiserror` para derivar `Display` e `Error`.

use thiserror::Error;

/// Erros que podem ocorrer ao buscar o conteúdo de uma URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// O servidor respondeu com um status fora da faixa 2xx.
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// A requisição excedeu o tempo limite do cliente.
    #[error("GET {url} timed out")]
    Timeout { url: String },

    /// Falha de rede subjacente (DNS, conexão recusada, corpo truncado).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}
