use candle_core::{DType, Device, Tensor};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use slotfill_core::{Crf, IdentityProjection, LabelVocab, SpanDecoder, ViterbiDecoder};

fn tokens(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn bench_span_decode(c: &mut Criterion) {
    let decoder = SpanDecoder::new(&IdentityProjection);
    let vocab = LabelVocab::from_slots(["device", "loc", "time"]);

    let utt = tokens(&["turn", "on", "the", "kitchen", "light", "in", "new", "york", "at", "noon"]);
    let tags = [
        "O", "O", "B-device", "I-device", "I-device", "O", "B-loc", "I-loc", "O", "B-time",
    ];
    let ids = vocab.encode_tags(&tags).unwrap();

    c.bench_function("span_decode_tags", |b| {
        b.iter(|| decoder.decode(black_box(&tags), black_box(&utt)));
    });

    c.bench_function("span_decode_ids", |b| {
        b.iter(|| decoder.decode_ids(&vocab, black_box(&ids), black_box(&utt)).unwrap());
    });
}

fn bench_viterbi(c: &mut Criterion) {
    let vocab = LabelVocab::from_slots(["device", "loc", "time"]);
    let n = vocab.num_tags();
    let seq_len = 32;

    let emissions: Vec<Vec<f32>> = (0..seq_len)
        .map(|t| (0..n).map(|k| ((t * 7 + k * 3) % 11) as f32 * 0.1).collect())
        .collect();
    let transitions: Vec<Vec<f32>> = (0..n)
        .map(|i| (0..n).map(|j| ((i + 2 * j) % 5) as f32 * -0.2).collect())
        .collect();
    let start = vec![0.0f32; n];
    let end = vec![0.0f32; n];

    let free = ViterbiDecoder::new(n);
    let constrained = ViterbiDecoder::new(n)
        .with_constraints(vocab.allowed_transitions(), vocab.allowed_starts())
        .unwrap();

    c.bench_function("viterbi_32_tokens", |b| {
        b.iter(|| free.decode(black_box(&emissions), &transitions, &start, &end).unwrap());
    });

    c.bench_function("viterbi_32_tokens_constrained", |b| {
        b.iter(|| constrained.decode(black_box(&emissions), &transitions, &start, &end).unwrap());
    });

    let device = Device::Cpu;
    let crf = Crf::from_tensors(
        Tensor::zeros(n, DType::F32, &device).unwrap(),
        Tensor::zeros(n, DType::F32, &device).unwrap(),
        Tensor::from_vec(transitions.concat(), (n, n), &device).unwrap(),
    )
    .unwrap();
    let batch: Vec<f32> = (0..8).flat_map(|_| emissions.iter().flatten().copied()).collect();
    let batch = Tensor::from_vec(batch, (8, seq_len, n), &device).unwrap();
    let mask = Tensor::ones((8, seq_len), DType::F32, &device).unwrap();

    c.bench_function("crf_viterbi_batch_8", |b| {
        b.iter(|| crf.viterbi_decode(black_box(&batch), &mask).unwrap());
    });
}

criterion_group!(benches, bench_span_decode, bench_viterbi);
criterion_main!(benches);
