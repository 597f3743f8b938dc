//! Persona rotation and proxy selection for the validation runners.
//!
//! Persona rotation is interval-based: the active persona advances every
//! `rotation_interval_seconds` of wall time, not per record, so a burst of
//! records inside one interval all present the same identity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use recondor_model::{Persona, Proxy, ProxySelectionStrategy};

use crate::{CoreError, Result};

pub struct PersonaRotator {
    personas: Vec<Persona>,
    interval: Duration,
    started: Instant,
}

impl PersonaRotator {
    /// `rotation_interval_seconds == 0` pins the first persona.
    pub fn new(personas: Vec<Persona>, rotation_interval_seconds: u32) -> Result<Self> {
        if personas.is_empty() {
            return Err(CoreError::Validation("persona pool is empty".into()));
        }
        Ok(Self {
            personas,
            interval: Duration::from_secs(u64::from(rotation_interval_seconds)),
            started: Instant::now(),
        })
    }

    pub fn current(&self) -> &Persona {
        self.persona_at(self.started.elapsed())
    }

    fn persona_at(&self, elapsed: Duration) -> &Persona {
        let slot = if self.interval.is_zero() {
            0
        } else {
            (elapsed.as_secs() / self.interval.as_secs()) as usize
        };
        &self.personas[slot % self.personas.len()]
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }
}

pub struct ProxySelector {
    proxies: Vec<Proxy>,
    strategy: ProxySelectionStrategy,
    cursor: AtomicUsize,
}

impl ProxySelector {
    /// An empty pool is valid: probes then go out directly.
    pub fn new(proxies: Vec<Proxy>, strategy: ProxySelectionStrategy) -> Self {
        Self {
            proxies,
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn next(&self) -> Option<&Proxy> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = match self.strategy {
            ProxySelectionStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len()
            }
            ProxySelectionStrategy::Random => rand::rng().random_range(0..self.proxies.len()),
            ProxySelectionStrategy::Weighted => self.weighted_index(),
        };
        Some(&self.proxies[index])
    }

    fn weighted_index(&self) -> usize {
        // Zero-weight proxies count as weight one so they are never starved.
        let weights: Vec<u64> = self
            .proxies
            .iter()
            .map(|p| u64::from(p.weight.max(1)))
            .collect();
        let total: u64 = weights.iter().sum();
        let mut roll = rand::rng().random_range(0..total);
        for (index, weight) in weights.iter().enumerate() {
            if roll < *weight {
                return index;
            }
            roll -= weight;
        }
        self.proxies.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recondor_model::{DnsPersonaConfig, PersonaConfig, PersonaId, ProxyId};

    fn persona(name: &str) -> Persona {
        Persona {
            id: PersonaId::new(),
            name: name.into(),
            config: PersonaConfig::Dns(DnsPersonaConfig::default()),
            is_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn proxy(name: &str, weight: u32) -> Proxy {
        Proxy {
            id: ProxyId::new(),
            name: name.into(),
            url: format!("http://{name}:8080"),
            weight,
            is_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn rotation_advances_per_interval_not_per_call() {
        let rotator =
            PersonaRotator::new(vec![persona("a"), persona("b"), persona("c")], 10).unwrap();
        assert_eq!(rotator.persona_at(Duration::from_secs(0)).name, "a");
        assert_eq!(rotator.persona_at(Duration::from_secs(9)).name, "a");
        assert_eq!(rotator.persona_at(Duration::from_secs(10)).name, "b");
        assert_eq!(rotator.persona_at(Duration::from_secs(25)).name, "c");
        assert_eq!(rotator.persona_at(Duration::from_secs(30)).name, "a");
    }

    #[test]
    fn zero_interval_pins_the_first_persona() {
        let rotator = PersonaRotator::new(vec![persona("a"), persona("b")], 0).unwrap();
        assert_eq!(rotator.persona_at(Duration::from_secs(3600)).name, "a");
    }

    #[test]
    fn empty_persona_pool_is_rejected() {
        assert!(PersonaRotator::new(Vec::new(), 10).is_err());
    }

    #[test]
    fn round_robin_cycles_through_the_pool() {
        let selector = ProxySelector::new(
            vec![proxy("p0", 1), proxy("p1", 1), proxy("p2", 1)],
            ProxySelectionStrategy::RoundRobin,
        );
        let picks: Vec<String> = (0..6)
            .map(|_| selector.next().unwrap().name.clone())
            .collect();
        assert_eq!(picks, vec!["p0", "p1", "p2", "p0", "p1", "p2"]);
    }

    #[test]
    fn empty_pool_yields_no_proxy() {
        let selector = ProxySelector::new(Vec::new(), ProxySelectionStrategy::Random);
        assert!(selector.next().is_none());
    }

    #[test]
    fn weighted_selection_never_starves_zero_weight_entries() {
        let selector = ProxySelector::new(
            vec![proxy("heavy", 100), proxy("zero", 0)],
            ProxySelectionStrategy::Weighted,
        );
        let mut saw_zero = false;
        for _ in 0..2_000 {
            if selector.next().unwrap().name == "zero" {
                saw_zero = true;
                break;
            }
        }
        assert!(saw_zero);
    }
}
