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

use secp256k1::{PublicKey, Secp256k1, SecretKey};

/// Stable per-process mesh identity. Generated fresh at startup; unlike the
/// LN identity it is not expected to persist across restarts.
#[derive(Clone)]
pub struct MeshIdentity {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl MeshIdentity {
    /// Generates a new random mesh keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = rand::thread_rng();
        let secret_key = SecretKey::new(&mut rng);
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        MeshIdentity { secret_key, public_key }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

/// The local node's LN identity, as reported by the LN collaborator's
/// `getWalletInfo`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LnIdentity {
    pub public_key: String,
    pub alias: String,
    pub version: String,
}
