//! Secret phrase generation and deterministic account derivation
//!
//! A phrase is a BIP39 English mnemonic. Its seed (empty passphrase) is split into two
//! domain-separated digests: one seeds the RNG the Falcon signing key is drawn from, the
//! other is the init seed of the wallet account. The same phrase therefore always yields
//! the same key pair and the same account id.

use std::fmt;

use bip39::{Language, Mnemonic};
use miden_client::{
    account::{
        component::{AuthRpoFalcon512, BasicWallet},
        Account, AccountStorageMode, AccountType,
    },
    crypto::SecretKey,
    Word,
};
use miden_objects::account::AccountBuilder;
use rand::{rngs::OsRng, rngs::StdRng, SeedableRng, TryRngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    error::{DeployError, DeployResult},
    ledger::Address,
};

const SIGNING_KEY_DOMAIN: &[u8] = b"prosopo-deploy/falcon-key/v1";
const ACCOUNT_SEED_DOMAIN: &[u8] = b"prosopo-deploy/account-seed/v1";

/// Number of words in a generated phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordCount {
    #[default]
    Twelve,
    Fifteen,
    Eighteen,
    TwentyOne,
    TwentyFour,
}

impl WordCount {
    pub fn words(self) -> usize {
        match self {
            WordCount::Twelve => 12,
            WordCount::Fifteen => 15,
            WordCount::Eighteen => 18,
            WordCount::TwentyOne => 21,
            WordCount::TwentyFour => 24,
        }
    }

    /// Entropy size in bytes (every 3 words carry 32 bits of entropy).
    pub fn entropy_len(self) -> usize {
        self.words() / 3 * 4
    }
}

impl TryFrom<usize> for WordCount {
    type Error = DeployError;

    fn try_from(words: usize) -> Result<Self, Self::Error> {
        match words {
            12 => Ok(WordCount::Twelve),
            15 => Ok(WordCount::Fifteen),
            18 => Ok(WordCount::Eighteen),
            21 => Ok(WordCount::TwentyOne),
            24 => Ok(WordCount::TwentyFour),
            other => Err(DeployError::Config(format!(
                "word count must be 12, 15, 18, 21 or 24 (got {other})"
            ))),
        }
    }
}

/// Secret text read from configuration before it has been validated as a phrase.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

/// A checksum-valid BIP39 phrase, normalized to lowercase single-spaced words.
///
/// Neither `Debug` nor `Display` reveal the words; use [`SecretPhrase::expose`] when the
/// operator explicitly asked for them.
#[derive(Clone)]
pub struct SecretPhrase(Zeroizing<String>);

impl SecretPhrase {
    /// Parses and validates a phrase.
    pub fn parse(phrase: &str) -> DeployResult<Self> {
        let normalized = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        if normalized.is_empty() {
            return Err(DeployError::InvalidSecret("phrase is empty".into()));
        }

        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|err| DeployError::InvalidSecret(err.to_string()))?;

        Ok(Self(Zeroizing::new(mnemonic.to_string())))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn word_count(&self) -> usize {
        self.0.split(' ').count()
    }

    fn seed(&self) -> DeployResult<Zeroizing<[u8; 64]>> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &self.0)
            .map_err(|err| DeployError::InvalidSecret(err.to_string()))?;
        Ok(Zeroizing::new(mnemonic.to_seed("")))
    }
}

impl fmt::Debug for SecretPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPhrase(<{} words redacted>)", self.word_count())
    }
}

impl fmt::Display for SecretPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// An account together with the key that signs for it.
#[derive(Clone)]
pub struct SigningAccount {
    address: Address,
    account: Account,
    seed: Word,
    secret_key: SecretKey,
}

impl SigningAccount {
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The wallet account as the ledger client sees it before its first transaction.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Seed the account id was ground from; required to register a new account.
    pub fn seed(&self) -> Word {
        self.seed
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

impl fmt::Debug for SigningAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Generates a fresh phrase from the operating system's entropy source and derives its
/// account. Performs no network calls.
pub fn generate(words: WordCount) -> DeployResult<(SecretPhrase, SigningAccount)> {
    generate_with(&mut OsRng, words)
}

/// Same as [`generate`] with an explicit entropy source.
pub fn generate_with<R: TryRngCore>(
    rng: &mut R,
    words: WordCount,
) -> DeployResult<(SecretPhrase, SigningAccount)> {
    let mut entropy = Zeroizing::new(vec![0_u8; words.entropy_len()]);
    rng.try_fill_bytes(&mut entropy)
        .map_err(|err| DeployError::EntropyUnavailable(err.to_string()))?;

    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|err| DeployError::EntropyUnavailable(err.to_string()))?;
    let phrase = SecretPhrase(Zeroizing::new(mnemonic.to_string()));
    let account = derive(&phrase)?;

    Ok((phrase, account))
}

/// Derives the wallet account controlled by `phrase`.
pub fn derive(phrase: &SecretPhrase) -> DeployResult<SigningAccount> {
    let seed = phrase.seed()?;

    let mut rng = StdRng::from_seed(domain_digest(SIGNING_KEY_DOMAIN, &seed[..]));
    let secret_key = SecretKey::with_rng(&mut rng);
    let init_seed = domain_digest(ACCOUNT_SEED_DOMAIN, &seed[..]);

    let (account, account_seed) = AccountBuilder::new(init_seed)
        .account_type(AccountType::RegularAccountImmutableCode)
        .storage_mode(AccountStorageMode::Public)
        .with_auth_component(AuthRpoFalcon512::new(secret_key.public_key()))
        .with_component(BasicWallet)
        .build()
        .map_err(|err| DeployError::InvalidSecret(format!("account derivation failed: {err}")))?;

    Ok(SigningAccount {
        address: Address::new(account.id().to_hex()),
        account,
        seed: account_seed,
        secret_key,
    })
}

/// Parses `phrase` and derives its account in one step.
pub fn derive_from_str(phrase: &str) -> DeployResult<SigningAccount> {
    derive(&SecretPhrase::parse(phrase)?)
}

fn domain_digest(domain: &[u8], seed: &[u8]) -> [u8; 32] {
    Sha256::new()
        .chain_update(domain)
        .chain_update(seed)
        .finalize()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "bottom drive obey lake curtain smoke basket hold race lonely fit walk";

    struct BrokenEntropy;

    #[derive(Debug)]
    struct NoEntropy;

    impl fmt::Display for NoEntropy {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("getrandom unavailable")
        }
    }

    impl std::error::Error for NoEntropy {}

    impl TryRngCore for BrokenEntropy {
        type Error = NoEntropy;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            Err(NoEntropy)
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            Err(NoEntropy)
        }

        fn try_fill_bytes(&mut self, _dst: &mut [u8]) -> Result<(), Self::Error> {
            Err(NoEntropy)
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let first = derive_from_str(PHRASE).unwrap();
        let second = derive_from_str(PHRASE).unwrap();

        assert_eq!(first.address(), second.address());
        assert_eq!(first.seed(), second.seed());
        assert_eq!(
            first.secret_key().public_key(),
            second.secret_key().public_key()
        );
    }

    #[test]
    fn phrase_is_normalized_before_derivation() {
        let messy = format!("  {}  ", PHRASE.to_uppercase().replace(' ', "   "));
        let normalized = derive_from_str(&messy).unwrap();
        let canonical = derive_from_str(PHRASE).unwrap();
        assert_eq!(normalized.address(), canonical.address());
    }

    #[test]
    fn different_phrases_derive_different_accounts() {
        let (phrase, generated) = generate(WordCount::Twelve).unwrap();
        let fixed = derive_from_str(PHRASE).unwrap();
        assert_ne!(generated.address(), fixed.address());
        assert_eq!(derive(&phrase).unwrap().address(), generated.address());
    }

    #[test]
    fn generated_phrase_has_requested_word_count() {
        for words in [WordCount::Twelve, WordCount::Eighteen, WordCount::TwentyFour] {
            let (phrase, _) = generate(words).unwrap();
            assert_eq!(phrase.word_count(), words.words());
            assert!(SecretPhrase::parse(phrase.expose()).is_ok());
        }
    }

    #[test]
    fn invalid_phrases_are_rejected() {
        for bad in [
            "",
            "not a real mnemonic at all",
            "bottom drive obey lake curtain smoke basket hold race lonely fit walked",
            // valid words, broken checksum
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon",
        ] {
            let err = SecretPhrase::parse(bad).unwrap_err();
            assert!(matches!(err, DeployError::InvalidSecret(_)), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn broken_entropy_source_is_fatal() {
        let err = generate_with(&mut BrokenEntropy, WordCount::Twelve).unwrap_err();
        assert_eq!(
            err,
            DeployError::EntropyUnavailable("getrandom unavailable".into())
        );
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let phrase = SecretPhrase::parse(PHRASE).unwrap();
        let account = derive(&phrase).unwrap();

        assert!(!format!("{phrase:?}").contains("bottom"));
        assert!(!format!("{phrase}").contains("bottom"));
        assert!(!format!("{:?}", SecretString::new(PHRASE)).contains("bottom"));
        assert!(format!("{account:?}").contains(account.address().as_str()));
    }

    #[test]
    fn word_count_conversion() {
        assert_eq!(WordCount::try_from(24).unwrap(), WordCount::TwentyFour);
        assert_eq!(WordCount::TwentyFour.entropy_len(), 32);
        assert_eq!(WordCount::Twelve.entropy_len(), 16);
        assert!(WordCount::try_from(13).is_err());
    }
}
