//! Confidential bet placement throughput.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use confidential_1x2::{AccountId, Outcome, Sandbox, UNIT};

fn bench_place_bet(c: &mut Criterion) {
    let sandbox = Sandbox::new().expect("sandbox");
    let owner = AccountId::from_subject("owner");

    c.bench_function("place_bet_confidential", |b| {
        b.iter_batched(
            || {
                let mut book = sandbox.book();
                let match_id = book.create_match(owner, "bench", 0).expect("create");
                let bettor = AccountId::from_subject("bettor");
                let input = sandbox.encryptor.encrypt_choice(Outcome::Draw, bettor).expect("encrypt");
                (book, match_id, bettor, input)
            },
            |(mut book, match_id, bettor, input)| {
                black_box(book.place_bet(bettor, match_id, &input, UNIT).expect("bet"));
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("place_bet_mock", |b| {
        b.iter_batched(
            || {
                let mut book = sandbox.book();
                let match_id = book.create_match(owner, "bench", 0).expect("create");
                (book, match_id)
            },
            |(mut book, match_id)| {
                black_box(book.place_bet_mock(owner, match_id, 1, UNIT).expect("bet"));
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_place_bet);
criterion_main!(benches);
