use rand::{rngs::StdRng, Rng, SeedableRng};
use shadertrace::ir::BlockIx;
use shadertrace::*;

/// A loop: entry -> body -> (body | exit).
fn looping() -> (Module, [BlockIx; 3]) {
    let mut b = ModuleBuilder::new();
    let f = b.function("cs_loop", Some(ShaderKind::Compute));
    let entry = b.block(f);
    let body = b.block(f);
    let exit = b.block(f);

    b.value(entry, ValueType::Int(32), Some(1));
    b.branch(entry, &[body]);
    b.phi(body, ValueType::Int(32), 2);
    b.value(body, ValueType::Double, Some(3));
    b.branch(body, &[body, exit]);
    b.value(exit, ValueType::Float, Some(4));
    b.ret(exit);
    (b.build().unwrap(), [entry, body, exit])
}

fn invocations(blocks: [BlockIx; 3], n: u32, seed: u64) -> Vec<Invocation> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|x| {
            let mut path = vec![blocks[0]];
            path.extend(std::iter::repeat(blocks[1]).take(rng.gen_range(1..4)));
            path.push(blocks[2]);

            let mut inv = Invocation::new(path)
                .with_input(SystemInput::DispatchThreadId(0), InputValue::Uint(x % 8))
                .with_input(SystemInput::DispatchThreadId(1), InputValue::Uint(x / 8));
            for inst in 0..7 {
                inv = inv.with_value(inst, rng.gen());
            }
            inv
        })
        .collect()
}

fn check(out: &Instrumentation, outcomes: &[Outcome], buf: &TraceBuffer) {
    let plan = out.plan(0).unwrap();
    let trace = decode(&buf.snapshot(), out.layout).unwrap();
    assert!(!trace.selected.overflowed);
    assert!(!trace.unselected.overflowed);

    for o in outcomes {
        let groups = trace.half(o.class).by_invocation();
        let records = &groups[&o.id];
        assert_eq!(records.len(), o.records);

        // every block contributes its steps, its header, then its terminator
        let mut steps = 0;
        let mut iter = records.iter();
        while let Some(r) = iter.next() {
            assert_eq!(r.invocation, o.id);
            if !r.is_block() {
                steps += 1;
                continue;
            }
            let bp = plan
                .blocks
                .iter()
                .find(|b| b.first_ordinal == r.ordinal)
                .unwrap();
            assert_eq!(r.header_payload as usize, bp.schema.record_count());
            assert_eq!(steps + 1, bp.schema.record_count());

            let term = iter.next().unwrap();
            assert_eq!(term.invocation, o.id);
            assert!(matches!(
                term.ty,
                RecordType::Step(StepKind::Void | StepKind::Ret)
            ));
            steps = 0;
        }
        assert_eq!(steps, 0);
    }

    let selected = outcomes
        .iter()
        .filter(|o| o.class == InterestClass::Selected)
        .count();
    assert_eq!(selected, 1);
}

#[test]
fn parallel_invocations_keep_their_records_intact() {
    let (m, blocks) = looping();
    let out = Instrumenter::new(&m, InstrumentConfig::new(1 << 20, [3, 2, 0]))
        .unwrap()
        .run()
        .unwrap();
    let buf = TraceBuffer::new(out.layout);
    let invs = invocations(blocks, 64, 7);

    let outcomes = Runner::new(&m, out.plan(0).unwrap())
        .run_all(&invs, &buf)
        .unwrap();
    check(&out, &outcomes, &buf);

    let written: u32 = outcomes.iter().map(|o| o.bytes).sum();
    assert_eq!(
        buf.counter(InterestClass::Selected) + buf.counter(InterestClass::Unselected),
        written
    );
}

#[test]
fn interleaved_invocations_keep_their_records_intact() {
    let (m, blocks) = looping();
    let out = Instrumenter::new(&m, InstrumentConfig::new(1 << 20, [5, 5, 0]))
        .unwrap()
        .run()
        .unwrap();
    let invs = invocations(blocks, 48, 11);

    for seed in 0..4 {
        let buf = TraceBuffer::new(out.layout);
        let outcomes = Runner::new(&m, out.plan(0).unwrap())
            .run_interleaved(&invs, &buf, seed)
            .unwrap();
        check(&out, &outcomes, &buf);
    }
}

#[test]
fn identity_is_the_first_raw_reservation() {
    let (m, blocks) = looping();
    let out = Instrumenter::new(&m, InstrumentConfig::new(1 << 20, [0; 3]))
        .unwrap()
        .run()
        .unwrap();
    let buf = TraceBuffer::new(out.layout);
    let invs = invocations(blocks, 32, 3);
    let outcomes = Runner::new(&m, out.plan(0).unwrap())
        .run_interleaved(&invs, &buf, 99)
        .unwrap();

    let trace = decode(&buf.snapshot(), out.layout).unwrap();
    for o in &outcomes {
        let base = out.layout.window(o.class).offset_bias;
        let first = trace
            .half(o.class)
            .records
            .iter()
            .find(|r| r.invocation == o.id)
            .unwrap();
        // below capacity the raw counter and the masked offset agree
        assert_eq!(first.offset, base + o.id);
    }
}

#[test]
fn overflow_stays_in_its_half() {
    let (m, blocks) = looping();
    // the largest block is 20 + 24 + 12 + 12 = 68 bytes; 512 / 4 = 128
    let out = Instrumenter::new(&m, InstrumentConfig::new(512, [0; 3]))
        .unwrap()
        .run()
        .unwrap();
    let buf = TraceBuffer::new(out.layout);
    let invs = invocations(blocks, 32, 5);
    let runner = Runner::new(&m, out.plan(0).unwrap());

    let selected: Vec<Invocation> = invs.iter().take(1).cloned().collect();
    runner.run_all(&selected, &buf).unwrap();
    let before = buf.snapshot();

    let unselected: Vec<Invocation> = invs[1..].to_vec();
    runner.run_all(&unselected, &buf).unwrap();
    let after = buf.snapshot();

    // everything up to and including the selected counter cell is untouched
    assert_eq!(before[..64], after[..64]);
    let trace = decode(&after, out.layout).unwrap();
    assert!(trace.unselected.overflowed);
    assert_eq!(trace.unselected.counter, buf.counter(InterestClass::Unselected));
}
