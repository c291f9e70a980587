mod codec;
mod shard_terms;

pub use codec::decode_terms;
pub use codec::encode_terms;
pub use shard_terms::ShardTerms;
pub use shard_terms::TermsUpdate;
pub use shard_terms::MissingLeaderTerm;
pub use shard_terms::RECOVERING_TERM_SUFFIX;
