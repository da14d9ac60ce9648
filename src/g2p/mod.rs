//! Grapheme-to-phoneme pipelines, built lazily and cached per language code.

pub mod espeak;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TtsError;
use crate::language::{LanguageProfile, LanguageTable};

pub use espeak::{EspeakConfig, EspeakFactory, EspeakPhonemizer};

/// Converts text in one language into the phoneme string the acoustic model reads.
pub trait Phonemizer: Send + Sync {
    fn name(&self) -> &str;

    /// Phonemize `text`. An empty string means there was nothing to speak.
    fn phonemize(&self, text: &str) -> Result<String, TtsError>;
}

/// Builds a phonemizer for a language profile. Construction may be slow.
pub trait PhonemizerFactory: Send + Sync {
    fn create(&self, profile: &LanguageProfile) -> Result<Arc<dyn Phonemizer>, TtsError>;
}

/// Process-lifetime cache holding one phonemizer per language code.
///
/// Construction happens under the cache lock, so concurrent first use of a
/// code builds exactly one pipeline. Failed constructions are not cached and
/// are retried on the next request.
pub struct G2pCache {
    table: LanguageTable,
    factory: Box<dyn PhonemizerFactory>,
    pipelines: Mutex<HashMap<&'static str, Arc<dyn Phonemizer>>>,
}

impl G2pCache {
    pub fn new(table: LanguageTable, factory: Box<dyn PhonemizerFactory>) -> Self {
        Self {
            table,
            factory,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_pipeline(&self, code: &str) -> Result<Arc<dyn Phonemizer>, TtsError> {
        let profile = self
            .table
            .by_code(code)
            .ok_or_else(|| TtsError::G2pUnavailable {
                code: code.to_string(),
                reason: "no language profile uses this code".to_string(),
            })?;

        let mut pipelines = self.pipelines.lock();
        if let Some(pipeline) = pipelines.get(profile.code) {
            return Ok(Arc::clone(pipeline));
        }

        log::info!(
            "Initializing G2P for '{}' (code '{}', {:?})",
            profile.name,
            profile.code,
            profile.backend
        );
        let pipeline = self.factory.create(profile).map_err(|e| match e {
            e @ (TtsError::G2pUnavailable { .. } | TtsError::EspeakNotFound) => e,
            other => TtsError::G2pUnavailable {
                code: profile.code.to_string(),
                reason: other.to_string(),
            },
        })?;
        pipelines.insert(profile.code, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    pub fn is_cached(&self, code: &str) -> bool {
        self.pipelines.lock().contains_key(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Upper;

    impl Phonemizer for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn phonemize(&self, text: &str) -> Result<String, TtsError> {
            Ok(text.to_uppercase())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl PhonemizerFactory for CountingFactory {
        fn create(&self, profile: &LanguageProfile) -> Result<Arc<dyn Phonemizer>, TtsError> {
            std::thread::sleep(Duration::from_millis(20));
            self.builds.fetch_add(1, Ordering::SeqCst);
            let pending = self.failures_left.load(Ordering::SeqCst);
            if pending > 0 {
                self.failures_left.store(pending - 1, Ordering::SeqCst);
                return Err(TtsError::PhonemizerFailed(format!(
                    "dictionary for {} missing",
                    profile.name
                )));
            }
            Ok(Arc::new(Upper))
        }
    }

    fn cache_with(factory: Arc<CountingFactory>) -> G2pCache {
        struct Shared(Arc<CountingFactory>);
        impl PhonemizerFactory for Shared {
            fn create(&self, profile: &LanguageProfile) -> Result<Arc<dyn Phonemizer>, TtsError> {
                self.0.create(profile)
            }
        }
        G2pCache::new(LanguageTable::builtin(), Box::new(Shared(factory)))
    }

    #[test]
    fn builds_once_per_code() {
        let factory = Arc::new(CountingFactory::default());
        let cache = cache_with(Arc::clone(&factory));

        let first = cache.get_pipeline("a").unwrap();
        let second = cache.get_pipeline("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        cache.get_pipeline("z").unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let factory = Arc::new(CountingFactory::default());
        let cache = cache_with(Arc::clone(&factory));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| cache.get_pipeline("j").unwrap());
            }
        });
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_construction_is_named_and_not_cached() {
        let factory = Arc::new(CountingFactory {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let cache = cache_with(Arc::clone(&factory));

        let err = cache.get_pipeline("a").err().unwrap();
        assert!(matches!(err, TtsError::G2pUnavailable { ref code, .. } if code == "a"));
        assert!(!cache.is_cached("a"));

        let pipeline = cache.get_pipeline("a").unwrap();
        assert_eq!(pipeline.phonemize("hi").unwrap(), "HI");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_code_is_unavailable() {
        let cache = cache_with(Arc::new(CountingFactory::default()));
        assert!(matches!(
            cache.get_pipeline("x"),
            Err(TtsError::G2pUnavailable { .. })
        ));
    }
}
