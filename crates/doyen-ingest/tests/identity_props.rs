//! Property tests for content-addressed identity

use doyen_ingest::identity::{AuthorInfo, DurableHash, Identity, InstitutionInfo};
use doyen_ingest::mesh::mesh_int;
use proptest::prelude::*;
use std::collections::HashSet;

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z .'-]{0,24}"
}

fn identifiers() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{3,6}\\.[0-9]{1,4}", 0..5)
}

fn institution() -> impl Strategy<Value = InstitutionInfo> {
    (name(), identifiers()).prop_map(|(name, ids)| InstitutionInfo::new(name, ids))
}

proptest! {
    #[test]
    fn institution_hash_ignores_identifier_order(
        name in name(),
        ids in identifiers(),
    ) {
        let mut reversed = ids.clone();
        reversed.reverse();

        let a = InstitutionInfo::new(name.clone(), ids);
        let b = InstitutionInfo::new(name, reversed);
        prop_assert_eq!(a.durable_hash(), b.durable_hash());
        prop_assert_eq!(a, b);
    }

    #[test]
    fn author_hash_ignores_affiliation_order(
        last in name(),
        first in prop::option::of(name()),
        affiliations in prop::collection::vec(institution(), 0..4),
    ) {
        let mut reversed = affiliations.clone();
        reversed.reverse();

        let a = AuthorInfo::new(last.clone())
            .with_first_name(first.clone())
            .with_affiliations(affiliations);
        let b = AuthorInfo::new(last)
            .with_first_name(first)
            .with_affiliations(reversed);
        prop_assert_eq!(a.durable_hash(), b.durable_hash());
    }

    #[test]
    fn distinct_last_names_hash_apart(a in name(), b in name()) {
        prop_assume!(a != b);
        prop_assert_ne!(
            AuthorInfo::new(a).durable_hash(),
            AuthorInfo::new(b).durable_hash()
        );
    }

    #[test]
    fn durable_hash_fits_sixty_bits(canonical in ".*") {
        let hash = DurableHash::of_canonical(&canonical).value();
        prop_assert!(hash >= 0);
        prop_assert!(hash < 1 << 60);
    }

    #[test]
    fn descriptor_and_concept_codes_never_collide(digits in 0u32..1_000_000) {
        let descriptor = mesh_int(&format!("D{:06}", digits)).unwrap();
        let concept = mesh_int(&format!("C{:09}", digits)).unwrap();
        prop_assert_eq!(descriptor, 1_000_000 + i64::from(digits));
        prop_assert_eq!(concept, 2_000_000_000 + i64::from(digits));
        prop_assert_ne!(descriptor, concept);
    }
}

#[test]
fn generated_author_corpus_has_no_collisions() {
    const FIRST: [&str; 20] = [
        "Ada", "Alan", "Barbara", "Claude", "Donald", "Edsger", "Frances", "Grace", "Hedy",
        "Ivan", "John", "Katherine", "Leslie", "Margaret", "Niklaus", "Radia", "Shafi",
        "Tim", "Whitfield", "Yukihiro",
    ];
    let labs = [
        InstitutionInfo::new("Bell Labs", vec!["grid.1".to_string()]),
        InstitutionInfo::new("Xerox PARC", Vec::new()),
    ];

    let mut seen = HashSet::new();
    let mut total = 0;
    for i in 0..500 {
        for (j, first) in FIRST.iter().enumerate() {
            let mut author = AuthorInfo::new(format!("Surname{i:03}"))
                .with_first_name(Some(first.to_string()));
            if j % 3 == 0 {
                author = author.with_affiliations(vec![labs[i % 2].clone()]);
            }
            seen.insert(author.durable_hash());
            total += 1;
        }
    }

    assert_eq!(total, 10_000);
    assert_eq!(seen.len(), total);
}
