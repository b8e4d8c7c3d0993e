use anyhow::Result;
use radioflow::blocks::Multiply;
use radioflow::blocks::VectorSink;
use radioflow::blocks::VectorSource;
use radioflow::runtime::scheduler::CoopScheduler;
use radioflow::runtime::Block;
use radioflow::runtime::BlockMetaBuilder;
use radioflow::runtime::Endpoint;
use radioflow::runtime::Error;
use radioflow::runtime::Flowgraph;
use radioflow::runtime::Kernel;
use radioflow::runtime::PortSpec;
use radioflow::runtime::Runtime;
use radioflow::runtime::SampleVec;
use radioflow::runtime::SignatureBuilder;
use radioflow::runtime::TypeSignature;
use radioflow::runtime::COMPLEX_FLOAT32;
use radioflow::runtime::FLOAT32;
use radioflow::Complex32;

fn f32_source(data: &[f32], rate: f64) -> Block {
    VectorSource::new(SampleVec::from_slice(FLOAT32, data), rate)
}

// two-source mixer, cooperative, finite
#[test]
fn mixer_runs_to_eof() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(f32_source(&[1.0, 2.0, 3.0], 1000.0));
    let b = fg.add_block(f32_source(&[10.0, 10.0, 10.0], 1000.0));
    let mul = fg.add_block(Multiply::new());
    let snk = fg.add_block(VectorSink::new(FLOAT32));

    fg.connect(a, "out", mul, "in1")?;
    fg.connect(b, "out", mul, "in2")?;
    fg.connect(mul, "out", snk, "in")?;

    let fg = Runtime::cooperative().run(fg)?;

    let snk = fg.kernel::<VectorSink>(snk).unwrap();
    assert_eq!(snk.samples().slice::<f32>(), &[10.0, 20.0, 30.0]);
    Ok(())
}

// rate mismatch surfaces at start, naming the mixing block
#[test]
fn rate_mismatch_fails_start() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(f32_source(&[1.0], 1000.0));
    let b = fg.add_block(f32_source(&[1.0], 2000.0));
    let mul = fg.add_block(Multiply::new());
    let snk = fg.add_block(VectorSink::new(FLOAT32));

    fg.connect(a, "out", mul, "in1")?;
    fg.connect(b, "out", mul, "in2")?;
    fg.connect(mul, "out", snk, "in")?;

    match Runtime::cooperative().start(fg) {
        Err(Error::RateMismatch { block, .. }) => assert!(block.starts_with("Multiply")),
        r => panic!("expected rate mismatch, got {:?}", r.map(|_| ())),
    }
    Ok(())
}

// no declared signature accepts (complex, real)
#[test]
fn type_mismatch_fails_start() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(VectorSource::new(
        SampleVec::from_slice(COMPLEX_FLOAT32, &[Complex32::new(1.0, 0.0)]),
        1000.0,
    ));
    let b = fg.add_block(f32_source(&[1.0], 1000.0));
    let mul = fg.add_block(Multiply::new());
    let snk = fg.add_block(VectorSink::new(COMPLEX_FLOAT32));

    fg.connect(a, "out", mul, "in1")?;
    fg.connect(b, "out", mul, "in2")?;
    fg.connect(mul, "out", snk, "in")?;

    match Runtime::cooperative().start(fg) {
        Err(Error::TypeMismatch { block, .. }) => assert!(block.starts_with("Multiply")),
        r => panic!("expected type mismatch, got {:?}", r.map(|_| ())),
    }
    Ok(())
}

// composite aliasing: one vector from the source reaches both children
#[test]
fn aliased_input_fans_out() -> Result<()> {
    let mut inner = Flowgraph::new();
    let s1 = inner.add_block(VectorSink::new(FLOAT32));
    let s2 = inner.add_block(VectorSink::new(FLOAT32));
    inner.add_type_signature(TypeSignature::new(
        vec![PortSpec::new("x", FLOAT32)],
        vec![],
    ));
    inner.connect(Endpoint::Graph, "x", s1, "in")?;
    inner.connect(Endpoint::Graph, "x", s2, "in")?;

    let mut fg = Flowgraph::new();
    let c = fg.add_composite(inner);
    let src = fg.add_block(f32_source(&[1.0, 2.0, 3.0], 48000.0));
    fg.connect(src, "out", c, "x")?;

    let fg = Runtime::with_scheduler(CoopScheduler::new()).run(fg)?;

    for name in ["VectorSink_0", "VectorSink_1"] {
        let id = fg.block_id(name).unwrap();
        let snk = fg.kernel::<VectorSink>(id).unwrap();
        assert_eq!(snk.samples().slice::<f32>(), &[1.0, 2.0, 3.0]);
    }
    Ok(())
}

// double connect is rejected before any pipe exists
#[test]
fn double_connect_rejected() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(f32_source(&[1.0], 1000.0));
    let b = fg.add_block(f32_source(&[1.0], 1000.0));
    let snk = fg.add_block(VectorSink::new(FLOAT32));

    fg.connect(a, "out", snk, "in")?;
    match fg.connect(b, "out", snk, "in") {
        Err(Error::MalformedConnection(msg)) => assert!(msg.contains("already connected")),
        r => panic!("expected malformed connection, got {r:?}"),
    }
    Ok(())
}

// test kernels for skip propagation and lifecycle counting

struct TickSource {
    remaining: usize,
    calls: usize,
    deinits: usize,
}

impl TickSource {
    fn block(n: usize) -> Block {
        Block::new(
            BlockMetaBuilder::new("TickSource").build(),
            SignatureBuilder::new().add(&[], &[("out", FLOAT32)]).build(),
            TickSource {
                remaining: n,
                calls: 0,
                deinits: 0,
            },
        )
    }
}

impl Kernel for TickSource {
    fn process(&mut self, _inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        self.calls += 1;
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(vec![SampleVec::from_slice(FLOAT32, &[1.0f32])]))
    }

    fn rate(&self, _input_rate: Option<f64>) -> Option<f64> {
        Some(1000.0)
    }

    fn deinit(&mut self) -> Result<()> {
        self.deinits += 1;
        Ok(())
    }
}

// buffers its input while closed, flushes everything once open
struct Gate {
    closed_ticks: usize,
    calls: usize,
    held: Vec<f32>,
    deinits: usize,
}

impl Gate {
    fn block(closed_ticks: usize) -> Block {
        Block::new(
            BlockMetaBuilder::new("Gate").build(),
            SignatureBuilder::new()
                .add(&[("in", FLOAT32)], &[("out", FLOAT32)])
                .build(),
            Gate {
                closed_ticks,
                calls: 0,
                held: Vec::new(),
                deinits: 0,
            },
        )
    }
}

impl Kernel for Gate {
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        self.calls += 1;
        self.held.extend_from_slice(inputs[0].slice::<f32>());
        if self.calls <= self.closed_ticks {
            return Ok(Some(vec![SampleVec::new(FLOAT32)]));
        }
        let out = SampleVec::from_slice(FLOAT32, &self.held);
        self.held.clear();
        Ok(Some(vec![out]))
    }

    fn deinit(&mut self) -> Result<()> {
        self.deinits += 1;
        Ok(())
    }
}

struct CountingSink {
    calls: usize,
    samples: usize,
    deinits: usize,
}

impl CountingSink {
    fn block() -> Block {
        Block::new(
            BlockMetaBuilder::new("CountingSink").build(),
            SignatureBuilder::new().add(&[("in", FLOAT32)], &[]).build(),
            CountingSink {
                calls: 0,
                samples: 0,
                deinits: 0,
            },
        )
    }
}

impl Kernel for CountingSink {
    fn process(&mut self, inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
        self.calls += 1;
        self.samples += inputs[0].len();
        Ok(Some(vec![]))
    }

    fn deinit(&mut self) -> Result<()> {
        self.deinits += 1;
        Ok(())
    }
}

// skip propagation: the sink is not ticked while the gate is idle, the
// source is polled every tick regardless
#[test]
fn idle_block_skips_downstream_only() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(TickSource::block(5));
    let b = fg.add_block(Gate::block(2));
    let c = fg.add_block(CountingSink::block());
    fg.connect(a, "out", b, "in")?;
    fg.connect(b, "out", c, "in")?;

    let fg = Runtime::cooperative().run(fg)?;

    let a = fg.kernel::<TickSource>(a).unwrap();
    let b = fg.kernel::<Gate>(b).unwrap();
    let c = fg.kernel::<CountingSink>(c).unwrap();

    // five producing ticks plus the EOF tick
    assert_eq!(a.calls, 6);
    assert_eq!(b.calls, 5);
    // skipped during the two closed ticks, ticked as soon as the gate opens
    assert_eq!(c.calls, 3);
    assert_eq!(c.samples, 5);
    Ok(())
}

// eof cascade: the run ends within one pass of the source's eof and
// cleanup happens exactly once per block
#[test]
fn eof_cascade_cleans_up_once() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(TickSource::block(3));
    let b = fg.add_block(Gate::block(0));
    let c = fg.add_block(CountingSink::block());
    fg.connect(a, "out", b, "in")?;
    fg.connect(b, "out", c, "in")?;

    let fg = Runtime::cooperative().run(fg)?;

    assert_eq!(fg.kernel::<TickSource>(a).unwrap().deinits, 1);
    assert_eq!(fg.kernel::<Gate>(b).unwrap().deinits, 1);
    let c = fg.kernel::<CountingSink>(c).unwrap();
    assert_eq!(c.deinits, 1);
    assert_eq!(c.samples, 3);
    Ok(())
}

// a mid-graph block may end the stream: head cuts off a longer source
#[test]
fn head_limits_stream() -> Result<()> {
    use radioflow::blocks::Head;

    let mut fg = Flowgraph::new();
    let src = fg.add_block(TickSource::block(100));
    let head = fg.add_block(Head::new(FLOAT32, 5));
    let snk = fg.add_block(VectorSink::new(FLOAT32));
    fg.connect(src, "out", head, "in")?;
    fg.connect(head, "out", snk, "in")?;

    let fg = Runtime::cooperative().run(fg)?;

    let snk = fg.kernel::<VectorSink>(snk).unwrap();
    assert_eq!(snk.samples().slice::<f32>(), &[1.0; 5]);
    Ok(())
}

// a kernel failure aborts the whole graph and is surfaced to the caller
#[test]
fn kernel_error_aborts_run() -> Result<()> {
    struct Faulty;
    impl Kernel for Faulty {
        fn process(&mut self, _inputs: &[SampleVec]) -> Result<Option<Vec<SampleVec>>> {
            anyhow::bail!("broken oscillator");
        }
        fn rate(&self, _input_rate: Option<f64>) -> Option<f64> {
            Some(1.0)
        }
    }

    let mut fg = Flowgraph::new();
    let src = fg.add_block(Block::new(
        BlockMetaBuilder::new("Faulty").build(),
        SignatureBuilder::new().add(&[], &[("out", FLOAT32)]).build(),
        Faulty,
    ));
    let snk = fg.add_block(VectorSink::new(FLOAT32));
    fg.connect(src, "out", snk, "in")?;

    match Runtime::cooperative().run(fg) {
        Err(Error::BlockRuntime { block, msg }) => {
            assert!(block.starts_with("Faulty"));
            assert!(msg.contains("broken oscillator"));
        }
        r => panic!("expected block runtime error, got {:?}", r.map(|_| ())),
    }
    Ok(())
}

// unconnected input is a topology error at start
#[test]
fn unconnected_input_fails_start() -> Result<()> {
    let mut fg = Flowgraph::new();
    let a = fg.add_block(f32_source(&[1.0], 1000.0));
    let mul = fg.add_block(Multiply::new());
    let snk = fg.add_block(VectorSink::new(FLOAT32));
    fg.connect(a, "out", mul, "in1")?;
    fg.connect(mul, "out", snk, "in")?;

    match Runtime::cooperative().start(fg) {
        Err(Error::Topology(msg)) => assert!(msg.contains("in2")),
        r => panic!("expected topology error, got {:?}", r.map(|_| ())),
    }
    Ok(())
}
