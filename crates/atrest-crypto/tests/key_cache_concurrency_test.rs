//! Concurrent access to a shared `CipherKeyCache`.
//!
//! Readers, writers and a resetter hammer the same domains from plain OS
//! threads. Invariants checked afterwards: one key per `(base_key_id, salt)`,
//! keys are never replaced, and every handed-out `Arc` stays usable.

use std::sync::{Arc, Barrier};
use std::thread;

use atrest_core::AuthTokenMode;
use atrest_crypto::{CipherError, CipherKeyCache, Decryptor, Encryptor};

const THREADS: usize = 8;
const ROUNDS: u64 = 200;

fn base_key(base_key_id: u64) -> [u8; 32] {
    [base_key_id as u8 ^ 0xA5; 32]
}

#[test]
fn racing_inserts_agree_on_one_key() {
    let cache = Arc::new(CipherKeyCache::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..ROUNDS)
                    .map(|id| {
                        cache
                            .insert_cipher_key_with_salt(1, id % 16, &base_key(id % 16), id)
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for round in 0..ROUNDS as usize {
        let first = &results[0][round];
        for other in &results[1..] {
            assert!(Arc::ptr_eq(first, &other[round]), "round {round}");
        }
    }
    assert_eq!(cache.len(), ROUNDS as usize);
}

#[test]
fn racing_latest_inserts_keep_one_salt_per_base_key() {
    let cache = Arc::new(CipherKeyCache::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.insert_cipher_key(2, 9, &base_key(9)).unwrap()
            })
        })
        .collect();

    let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(keys.iter().all(|k| Arc::ptr_eq(k, &keys[0])));
    assert_eq!(cache.all_cipher_keys(2).len(), 1);
    assert!(Arc::ptr_eq(&cache.latest_cipher_key(2).unwrap(), &keys[0]));
}

#[test]
fn racing_latest_inserts_after_header_driven_insert_agree() {
    let cache = Arc::new(CipherKeyCache::new());
    let rebuilt = cache.insert_cipher_key_with_salt(5, 9, &base_key(9), 77).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.insert_cipher_key(5, 9, &base_key(9)).unwrap()
            })
        })
        .collect();

    let keys: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(keys.iter().all(|k| Arc::ptr_eq(k, &keys[0])));
    assert!(Arc::ptr_eq(&cache.latest_cipher_key(5).unwrap(), &keys[0]));
    assert!(Arc::ptr_eq(&cache.cipher_key(5, 9, 77).unwrap(), &rebuilt));
    assert_eq!(cache.all_cipher_keys(5).len(), 2);
}

#[test]
fn conflicting_material_never_replaces_a_key() {
    let cache = Arc::new(CipherKeyCache::new());
    let original = cache.insert_cipher_key_with_salt(3, 1, &base_key(1), 42).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let forged = [t as u8; 32];
                cache.insert_cipher_key_with_salt(3, 1, &forged, 42)
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(CipherError::UpdateCipherKey { .. })));
    }
    let current = cache.cipher_key(3, 1, 42).unwrap();
    assert!(Arc::ptr_eq(&current, &original));
}

#[test]
fn encryption_survives_concurrent_cleanup() {
    let cache = Arc::new(CipherKeyCache::new());
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let mut handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let text = cache.insert_cipher_key(4, 1, &base_key(1)).unwrap();
                    let header_key = Arc::clone(&text);
                    let plaintext = format!("thread {t} round {round}");
                    let (ciphertext, header) = Encryptor::with_random_iv(
                        Arc::clone(&text),
                        Arc::clone(&header_key),
                        AuthTokenMode::Multi,
                    )
                    .encrypt(plaintext.as_bytes())
                    .unwrap();
                    let decrypted = Decryptor::for_header(text, header_key, &header)
                        .decrypt(ciphertext.as_slice(), &header)
                        .unwrap();
                    assert_eq!(decrypted.as_slice(), plaintext.as_bytes());
                }
            })
        })
        .collect();

    let resetter = {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..ROUNDS {
                if i % 2 == 0 {
                    cache.reset_domain(4);
                } else {
                    cache.cleanup();
                }
                thread::yield_now();
            }
        })
    };

    handles.push(resetter);
    for handle in handles {
        handle.join().unwrap();
    }
}
