pub mod beacon;
pub mod combiner;
pub mod domain;
pub mod staking;

pub use beacon::{
    BeaconKeyGen, BeaconPublicKey, BeaconSecretKeyShare, BeaconSignature, BeaconSignatureShare,
    combine_shares,
};
pub use combiner::Combiner;
pub use domain::{sign_bytes, DomainTag};
pub use staking::{StakingAggregate, StakingKeyPair, StakingPublicKey, StakingSignature};
