//! alloy-backed implementations of [`ChainReader`] and [`TransferSender`].

use alloy_network::{ReceiptResponse, TransactionResponse};
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::TransactionReceipt;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use std::num::NonZeroUsize;
use tower::ServiceBuilder;
use x402_oracle_types::config::RpcConfig;

#[cfg(feature = "client")]
pub use wallet::*;

use crate::chain::erc20::IERC20;
use crate::chain::{
    ChainReadError, ChainReader, ObservedLog, ObservedReceipt, ObservedTransaction,
};

#[derive(Debug, thiserror::Error)]
pub enum ProviderInitError {
    #[error("No http(s) RPC endpoint configured")]
    NoHttpTransport,
    #[cfg(feature = "client")]
    #[error(transparent)]
    Signer(#[from] alloy_signer_local::LocalSignerError),
}

/// Builds a JSON-RPC client over every http(s) endpoint in `rpc`.
///
/// Each endpoint is throttled to its `rate_limit` and the set is wrapped in a fallback
/// layer, so a flaky node degrades reads instead of failing them.
pub fn rpc_client(rpc: &[RpcConfig]) -> Result<RpcClient, ProviderInitError> {
    let transports = rpc
        .iter()
        .filter_map(|provider_config| {
            let scheme = provider_config.http.scheme();
            let is_http = scheme == "http" || scheme == "https";
            if !is_http {
                return None;
            }
            let rpc_url = provider_config.http.clone();
            #[cfg(feature = "telemetry")]
            tracing::info!(rpc_url=%rpc_url, rate_limit=?provider_config.rate_limit, "Using HTTP transport");
            let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
            let service = ServiceBuilder::new()
                .layer(ThrottleLayer::new(rate_limit))
                .service(Http::new(rpc_url));
            Some(service)
        })
        .collect::<Vec<_>>();
    let active = NonZeroUsize::new(transports.len()).ok_or(ProviderInitError::NoHttpTransport)?;
    let fallback = ServiceBuilder::new()
        .layer(FallbackLayer::default().with_active_transport_count(active))
        .service(transports);
    Ok(RpcClient::new(fallback, false))
}

/// Read-only chain access over any alloy [`Provider`].
#[derive(Debug, Clone)]
pub struct Eip155ChainProvider<P = RootProvider> {
    inner: P,
}

impl Eip155ChainProvider<RootProvider> {
    pub fn connect(rpc: &[RpcConfig]) -> Result<Self, ProviderInitError> {
        let client = rpc_client(rpc)?;
        Ok(Self::new(RootProvider::new(client)))
    }
}

impl<P> Eip155ChainProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

pub(crate) fn observe_receipt(receipt: &TransactionReceipt) -> ObservedReceipt {
    let logs = receipt
        .inner
        .logs()
        .iter()
        .map(|log| ObservedLog {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
        })
        .collect();
    ObservedReceipt {
        transaction_hash: receipt.transaction_hash,
        success: ReceiptResponse::status(receipt),
        logs,
    }
}

#[async_trait::async_trait]
impl<P: Provider> ChainReader for Eip155ChainProvider<P> {
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), err, fields(otel.kind = "client")))]
    async fn get_transaction(
        &self,
        hash: B256,
    ) -> Result<Option<ObservedTransaction>, ChainReadError> {
        let tx = self.inner.get_transaction_by_hash(hash).await?;
        Ok(tx.map(|tx| ObservedTransaction {
            hash,
            from: TransactionResponse::from(&tx),
            to: alloy_consensus::Transaction::to(&tx),
            input: alloy_consensus::Transaction::input(&tx).clone(),
        }))
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), err, fields(otel.kind = "client")))]
    async fn get_receipt(&self, hash: B256) -> Result<Option<ObservedReceipt>, ChainReadError> {
        let receipt = self.inner.get_transaction_receipt(hash).await?;
        Ok(receipt.as_ref().map(observe_receipt))
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), err, fields(otel.kind = "client")))]
    async fn get_token_balance(
        &self,
        token: Address,
        account: Address,
    ) -> Result<U256, ChainReadError> {
        let contract = IERC20::new(token, &self.inner);
        let balance = contract.balanceOf(account).call().await?;
        Ok(balance)
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), err, fields(otel.kind = "client")))]
    async fn get_native_balance(&self, account: Address) -> Result<U256, ChainReadError> {
        let balance = self.inner.get_balance(account).await?;
        Ok(balance)
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), err, fields(otel.kind = "client")))]
    async fn get_token_decimals(&self, token: Address) -> Result<u8, ChainReadError> {
        let contract = IERC20::new(token, &self.inner);
        let decimals = contract.decimals().call().await?;
        Ok(decimals)
    }
}

#[cfg(feature = "client")]
mod wallet {
    use alloy_network::{EthereumWallet, TransactionBuilder};
    use alloy_primitives::{Address, B256, U256};
    use alloy_provider::fillers::{
        BlobGasFiller, CachedNonceManager, ChainIdFiller, FillProvider, GasFiller, JoinFill,
        NonceFiller, WalletFiller,
    };
    use alloy_provider::{
        Identity, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
        RootProvider, WatchTxError,
    };
    use alloy_rpc_types_eth::TransactionRequest;
    use alloy_signer_local::{LocalSignerError, PrivateKeySigner};
    use std::time::Duration;
    use x402_oracle_types::config::RpcConfig;

    use super::{Eip155ChainProvider, ProviderInitError, observe_receipt, rpc_client};
    use crate::chain::{
        ChainReadError, ChainReader, ChainWriteError, EvmPrivateKey, ObservedReceipt,
        ObservedTransaction, TransferRequest, TransferSender, transfer_calldata,
    };

    /// Combined filler type for gas, blob gas, nonce, and chain ID.
    pub type InnerFiller = JoinFill<
        GasFiller,
        JoinFill<BlobGasFiller, JoinFill<NonceFiller<CachedNonceManager>, ChainIdFiller>>,
    >;

    /// Provider stack that fills and signs transactions with a local key.
    pub type InnerProvider = FillProvider<
        JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
        RootProvider,
    >;

    /// Chain access for the paying side: reads plus signed ERC-20 transfers.
    ///
    /// On networks without EIP-1559 (`eip1559 = false`) the gas price is fetched and set
    /// explicitly before sending.
    #[derive(Debug)]
    pub struct Eip155WalletProvider {
        reader: Eip155ChainProvider<InnerProvider>,
        payer: Address,
        eip1559: bool,
    }

    impl Eip155WalletProvider {
        pub fn connect(
            rpc: &[RpcConfig],
            key: &EvmPrivateKey,
            eip1559: bool,
        ) -> Result<Self, ProviderInitError> {
            let signer = PrivateKeySigner::from_bytes(&B256::from(*key.as_bytes()))
                .map_err(LocalSignerError::from)?;
            let payer = signer.address();
            let wallet = EthereumWallet::from(signer);
            let client = rpc_client(rpc)?;
            let filler = JoinFill::new(
                GasFiller,
                JoinFill::new(
                    BlobGasFiller::default(),
                    JoinFill::new(
                        NonceFiller::new(CachedNonceManager::default()),
                        ChainIdFiller::default(),
                    ),
                ),
            );
            let inner: InnerProvider = ProviderBuilder::default()
                .filler(filler)
                .wallet(wallet)
                .connect_client(client);

            #[cfg(feature = "telemetry")]
            tracing::info!(payer=%payer, eip1559, "Using EVM wallet provider");

            Ok(Self {
                reader: Eip155ChainProvider::new(inner),
                payer,
                eip1559,
            })
        }
    }

    #[async_trait::async_trait]
    impl ChainReader for Eip155WalletProvider {
        async fn get_transaction(
            &self,
            hash: B256,
        ) -> Result<Option<ObservedTransaction>, ChainReadError> {
            self.reader.get_transaction(hash).await
        }

        async fn get_receipt(
            &self,
            hash: B256,
        ) -> Result<Option<ObservedReceipt>, ChainReadError> {
            self.reader.get_receipt(hash).await
        }

        async fn get_token_balance(
            &self,
            token: Address,
            account: Address,
        ) -> Result<U256, ChainReadError> {
            self.reader.get_token_balance(token, account).await
        }

        async fn get_native_balance(&self, account: Address) -> Result<U256, ChainReadError> {
            self.reader.get_native_balance(account).await
        }

        async fn get_token_decimals(&self, token: Address) -> Result<u8, ChainReadError> {
            self.reader.get_token_decimals(token).await
        }
    }

    #[async_trait::async_trait]
    impl TransferSender for Eip155WalletProvider {
        fn payer(&self) -> Address {
            self.payer
        }

        #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(token = %request.token, to = %request.to, amount = %request.amount)))]
        async fn submit_transfer(&self, request: TransferRequest) -> Result<B256, ChainWriteError> {
            let provider = self.reader.inner();
            let calldata = transfer_calldata(request.to, request.amount, &request.extra_data);
            let mut txr = TransactionRequest::default()
                .with_from(self.payer)
                .with_to(request.token)
                .with_input(calldata)
                .with_gas_limit(request.gas_limit);
            if !self.eip1559 {
                let gas: u128 = provider.get_gas_price().await?;
                txr.set_gas_price(gas);
            }
            let pending = provider.send_transaction(txr).await?;
            Ok(*pending.tx_hash())
        }

        #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), err))]
        async fn wait_for_confirmation(
            &self,
            hash: B256,
            timeout: Duration,
        ) -> Result<ObservedReceipt, ChainWriteError> {
            let root = self.reader.inner().root().clone();
            let receipt = PendingTransactionBuilder::new(root, hash)
                .with_timeout(Some(timeout))
                .get_receipt()
                .await
                .map_err(|e| match e {
                    PendingTransactionError::TxWatcher(WatchTxError::Timeout) => {
                        ChainWriteError::Timeout(hash, timeout)
                    }
                    other => ChainWriteError::PendingTransaction(other),
                })?;
            let observed = observe_receipt(&receipt);
            if !observed.success {
                return Err(ChainWriteError::Reverted(hash));
            }
            Ok(observed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_client_requires_http_endpoint() {
        let ws: RpcConfig = serde_json::from_str(r#"{"http":"ws://localhost:8546"}"#).unwrap();
        assert!(matches!(
            rpc_client(&[ws]),
            Err(ProviderInitError::NoHttpTransport)
        ));
        assert!(matches!(
            rpc_client(&[]),
            Err(ProviderInitError::NoHttpTransport)
        ));
    }

    #[cfg(feature = "client")]
    #[test]
    fn test_wallet_rejects_out_of_range_key() {
        use crate::chain::EvmPrivateKey;

        let rpc: RpcConfig = serde_json::from_str(r#"{"http":"http://localhost:8545"}"#).unwrap();
        let zero: EvmPrivateKey = B256::ZERO.to_string().parse().unwrap();
        assert!(matches!(
            Eip155WalletProvider::connect(&[rpc.clone()], &zero, true),
            Err(ProviderInitError::Signer(_))
        ));

        let key: EvmPrivateKey =
            "0xcafe000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        assert!(Eip155WalletProvider::connect(&[rpc], &key, true).is_ok());
    }
}
