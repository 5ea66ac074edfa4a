use crate::errors::{WalletError, WalletResult};

/// Where CPU-bound cryptographic jobs run.
///
/// `Blocking` hands the job to the tokio blocking pool and falls back to
/// running inline when no runtime is available. Jobs must be fully
/// parameterised by the caller (including salts and IVs) so both modes
/// produce identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoWorker {
    Inline,
    #[default]
    Blocking,
}

impl CryptoWorker {
    pub fn from_flag(offload: bool) -> Self {
        if offload {
            CryptoWorker::Blocking
        } else {
            CryptoWorker::Inline
        }
    }

    pub async fn run<F, T>(&self, job: F) -> WalletResult<T>
    where
        F: FnOnce() -> WalletResult<T> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            CryptoWorker::Inline => job(),
            CryptoWorker::Blocking => match tokio::runtime::Handle::try_current() {
                Ok(handle) => handle.spawn_blocking(job).await.map_err(|e| {
                    WalletError::CryptoError(format!("Crypto worker failed: {}", e))
                })?,
                Err(_) => {
                    log::debug!("No async runtime available, running crypto job inline");
                    job()
                }
            },
        }
    }
}
