use shadertrace::ir::{Slot, SlotIndex};
use shadertrace::*;

/// An add, a store to a fixed element of a local, and a return.
fn add_store_ret() -> Module {
    let mut b = ModuleBuilder::new();
    let f = b.function("cs_main", Some(ShaderKind::Compute));
    let b0 = b.block(f);
    b.value(b0, ValueType::Int(32), Some(7));
    b.store(
        b0,
        Slot {
            base: 9,
            index: SlotIndex::Static(2),
            array_size: Some(4),
        },
        ValueType::Int(32),
    );
    b.ret(b0);
    b.build().unwrap()
}

#[test]
fn schema_line_for_a_straight_block() {
    let m = add_store_ret();
    let out = Instrumenter::new(&m, InstrumentConfig::new(1024, [0; 3]))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(out.schema_text(), "Block#0:0,3,7,a;1,3,11,s,9+2;2,r,0,r;\n");

    let plan = out.plan(0).unwrap();
    let sizes: Vec<(u8, u32)> = plan.blocks[0]
        .insertions
        .iter()
        .map(|i| (i.record.ty.tag(), i.record.bytes()))
        .collect();
    assert_eq!(sizes, vec![(253, 20), (BLOCK_TAG, 12), (250, 12)]);
    assert_eq!(plan.blocks[0].bytes, 44);
}

#[test]
fn runs_and_decodes() {
    let m = add_store_ret();
    let out = Instrumenter::new(&m, InstrumentConfig::new(1024, [1, 0, 0]))
        .unwrap()
        .run()
        .unwrap();
    let plan = out.plan(0).unwrap();
    let buf = TraceBuffer::new(out.layout);
    let runner = Runner::new(&m, plan);

    let hit = Invocation::new(vec![0])
        .with_input(SystemInput::DispatchThreadId(0), InputValue::Uint(1))
        .with_value(0, 0x1234);
    let miss = Invocation::new(vec![0]).with_value(0, 0x99);

    let hit = runner.run(&hit, &buf).unwrap();
    let miss = runner.run(&miss, &buf).unwrap();
    assert_eq!(hit.class, InterestClass::Selected);
    assert_eq!(miss.class, InterestClass::Unselected);
    assert_eq!((hit.id, miss.id), (0, 0));

    let trace = decode(&buf.snapshot(), out.layout).unwrap();
    let sel = &trace.selected.records;
    assert_eq!(sel.len(), 3);
    assert_eq!(sel[0].ty, RecordType::Step(StepKind::UInt32));
    assert_eq!(sel[0].bits(), Some(0x1234));
    assert_eq!(sel[0].slot(), Some((7, 0)));
    assert_eq!(sel[0].ordinal, 0);
    assert!(sel[1].is_block());
    assert_eq!(sel[1].header_payload, 2);
    assert_eq!(sel[2].ty, RecordType::Step(StepKind::Ret));
    assert_eq!(sel[2].ordinal, 2);
    assert_eq!(trace.selected.counter, 44);

    let unsel = &trace.unselected.records;
    assert_eq!(unsel.len(), 3);
    assert_eq!(unsel[0].bits(), Some(0x99));
    assert!(unsel.iter().all(|r| r.offset >= 512));
}

#[test]
fn schema_text_parses_back() {
    let m = add_store_ret();
    let out = Instrumenter::new(&m, InstrumentConfig::default())
        .unwrap()
        .run()
        .unwrap();
    let lines = parse_schema(&out.schema_text()).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].entries[1].access, Access::Static { base: 9, index: 2 });
    assert_eq!(lines[0].record_count(), 2);
}

#[test]
fn narrow_and_wide_values() {
    let mut b = ModuleBuilder::new();
    let f = b.function("vs", Some(ShaderKind::Vertex));
    let b0 = b.block(f);
    let flag = b.value(b0, ValueType::Int(1), Some(1));
    let half = b.value(b0, ValueType::Half, Some(2));
    let wide = b.value(b0, ValueType::Int(64), Some(3));
    let dbl = b.value(b0, ValueType::Double, Some(4));
    b.ret(b0);
    let m = b.build().unwrap();

    let out = Instrumenter::new(&m, InstrumentConfig::new(4096, [0; 3]))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(
        out.plan(f).unwrap().required_inputs(),
        &[ir::SystemValue::VertexId, ir::SystemValue::InstanceId]
    );
    assert_eq!(
        out.schema_text(),
        "Block#0:0,3,1,a;1,f,2,a;2,6,3,a;3,d,4,a;4,r,0,r;\n"
    );

    let buf = TraceBuffer::new(out.layout);
    let inv = Invocation::new(vec![b0])
        .with_value(flag, 0xff)
        .with_value(half, 0x3c00)
        .with_value(wide, 0x0123_4567_89ab_cdef)
        .with_value(dbl, (-2.5f64).to_bits());
    Runner::new(&m, out.plan(f).unwrap()).run(&inv, &buf).unwrap();

    let trace = decode(&buf.snapshot(), out.layout).unwrap();
    let r = &trace.selected.records;
    assert_eq!(r[0].bits(), Some(1));
    assert_eq!(r[1].as_f32(), Some(1.0));
    assert_eq!(r[2].bits(), Some(0x0123_4567_89ab_cdef));
    assert_eq!(r[3].as_f64(), Some(-2.5));
    assert_eq!(r[3].slot(), Some((4, 0)));
}

#[test]
fn json_module_round_trip() {
    let module = r#"{
        "functions": [{
            "name": "ps_main",
            "kind": "pixel",
            "blocks": [
                { "insts": [
                    { "op": "value", "ty": "float", "reg": 1 },
                    { "op": { "branch": { "targets": [1] } } }
                ] },
                { "insts": [
                    { "op": "phi", "ty": "float", "reg": 2 },
                    { "op": "return" }
                ] }
            ]
        }]
    }"#;
    let m = Module::from_json(module).unwrap();
    let config = InstrumentConfig::from_json(r#"{"buffer_size": 2048}"#).unwrap();
    let out = Instrumenter::new(&m, config).unwrap().run().unwrap();

    assert_eq!(
        out.schema_text(),
        "Block#0:0,f,1,a;1,v,0,v;\nBlock#2:2,f,2,a;3,r,0,r;\n"
    );
    let report = out.report();
    assert_eq!(report.buffer_size, 2048);
    assert_eq!(report.functions[0].name, "ps_main");
    assert_eq!(report.functions[0].required_inputs, &[ir::SystemValue::Position]);
}

#[test]
fn dynamic_slot_store_records_its_index() {
    let mut b = ModuleBuilder::new();
    let f = b.function("cs_main", Some(ShaderKind::Compute));
    let b0 = b.block(f);
    let idx = b.value(b0, ValueType::Int(32), Some(1));
    b.store(
        b0,
        Slot {
            base: 10,
            index: SlotIndex::Dynamic(idx),
            array_size: Some(8),
        },
        ValueType::Float,
    );
    b.ret(b0);
    let m = b.build().unwrap();

    let out = Instrumenter::new(&m, InstrumentConfig::new(1024, [0; 3]))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(out.schema_text(), "Block#0:0,3,1,a;1,f,10,d,10-8;2,r,0,r;\n");

    let buf = TraceBuffer::new(out.layout);
    let inv = Invocation::new(vec![b0]).with_value(idx, 0x1_0003);
    Runner::new(&m, out.plan(f).unwrap()).run(&inv, &buf).unwrap();

    let trace = decode(&buf.snapshot(), out.layout).unwrap();
    let r = &trace.selected.records;
    assert_eq!(r.len(), 4);
    // the index itself, as an assignment
    assert_eq!(r[0].bits(), Some(0x1_0003));
    assert_eq!(r[0].slot(), Some((1, 0)));
    // the store: a uint32 record of the index, ordinal keeps its low 16 bits
    assert_eq!(r[1].ty, RecordType::Step(StepKind::UInt32));
    assert_eq!(r[1].ordinal, 1);
    assert_eq!(r[1].bits(), Some(0x1_0003));
    assert_eq!(r[1].slot(), Some((10, 3)));
    assert_eq!(r[1].value_ordinal, Some(pack_value_ordinal(10, 0x1_0003)));
    assert!(r[2].is_block());
    assert_eq!(r[2].header_payload, 3);
}

#[test]
fn bad_module_json_is_a_module_error() {
    assert!(matches!(
        Module::from_json(r#"{"functions": 3}"#),
        Err(InstrumentError::MalformedModule(_))
    ));
}

#[test]
fn bad_config_is_rejected() {
    assert!(matches!(
        InstrumentConfig::from_json(r#"{"buffer_size": 1000}"#),
        Err(InstrumentError::InvalidBufferSize(1000))
    ));
    assert!(matches!(
        InstrumentConfig::from_json("{"),
        Err(InstrumentError::Config(_))
    ));
}
