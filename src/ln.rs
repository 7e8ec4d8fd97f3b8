// Rebalanced: distributed channel rebalancing daemon for a trusted mesh of
// Lightning Network nodes.
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The LN node collaborator contract. This crate only defines the trait
//! and a test fake; a real implementation (LND/CLN RPC client) is injected
//! by whatever binary wires this crate up.

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::registry::ChannelId;

/// One entry of `getChannels()`, before it is folded into the cached
/// [`crate::registry::ChannelView`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub partner_public_key: String,
    pub local_balance: u64,
    pub remote_balance: u64,
    pub capacity: u64,
    pub is_active: bool,
    pub is_opening: bool,
    pub is_closing: bool,
    pub is_private: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletInfo {
    pub public_key: String,
    pub alias: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub description: String,
    pub expires_at: u64,
    pub tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub request: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedInvoice {
    pub tokens: u64,
    pub destination: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayRequest {
    pub request: String,
    pub outgoing_channel: ChannelId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayResult {
    pub id: String,
    pub is_confirmed: bool,
    pub confirmed_at: u64,
}

/// The LN node collaborator: invoice creation, decode, payment execution,
/// and channel/wallet introspection. Only the contract is specified here;
/// talking to a real LN node is a concern for the binary that wires this
/// crate up.
#[async_trait]
pub trait LnClient: Send + Sync {
    async fn get_wallet_info(&self) -> Result<WalletInfo, CollaboratorError>;

    async fn get_channels(&self) -> Result<Vec<ChannelInfo>, CollaboratorError>;

    async fn create_invoice(
        &self,
        req: InvoiceRequest,
    ) -> Result<CreatedInvoice, CollaboratorError>;

    async fn decode_payment_request(
        &self,
        request: &str,
    ) -> Result<DecodedInvoice, CollaboratorError>;

    async fn pay(&self, req: PayRequest) -> Result<PayResult, CollaboratorError>;
}
