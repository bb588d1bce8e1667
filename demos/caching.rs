use sovran_scoped::{scoped, Scoped};
use std::collections::HashMap;

// Memoization that callers switch on by putting a cache in scope.
struct PrimeCacheTag;
type ScopedCache = Scoped<HashMap<u64, bool>, PrimeCacheTag>;

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }

    if let Some(cache) = ScopedCache::get() {
        if let Some(&hit) = cache.get(&n) {
            println!("Cache hit for {}", n);
            return hit;
        }
    }

    let mut result = true;
    let mut i = 2;
    while i * i <= n {
        if n % i == 0 {
            result = false;
            break;
        }
        i += 1;
    }

    if let Some(mut cache) = ScopedCache::get_mut() {
        cache.insert(n, result);
    }
    result
}

fn next_prime(n: u64) -> u64 {
    let mut k = n + 1;
    while !is_prime(k) {
        k += 1;
    }
    k
}

fn first_n_primes(n: usize) -> Vec<u64> {
    let mut primes = Vec::with_capacity(n);
    let mut p = 0;
    for _ in 0..n {
        p = next_prime(p);
        primes.push(p);
    }
    primes
}

fn main() {
    // Without a cache every call recomputes
    println!("{:?}", first_n_primes(3));

    scoped!(let cache = ScopedCache::default());
    first_n_primes(5);
    for p in first_n_primes(10) {
        println!("{}", p);
    }
    println!("{} entries cached", cache.value().len());
}
