use tracing::info;

use super::{Error, LnUrlClient};

impl LnUrlClient {
    /// Hands `invoice` to the service of the last resolved withdraw request.
    ///
    /// The service pays the invoice asynchronously, success here only means
    /// it accepted the request.
    pub async fn finish_withdraw(&mut self, invoice: &str) -> Result<(), Error> {
        let pending = self
            .pending_withdraw
            .as_ref()
            .ok_or(Error::NoPendingWithdraw)?;

        let url = format!("{}&pr={}", pending.callback, invoice);
        self.get_json(&url).await?;

        info!("Withdraw request accepted");
        self.pending_withdraw = None;

        Ok(())
    }
}
