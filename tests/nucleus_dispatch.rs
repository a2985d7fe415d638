//! Nucleus routing tests
//!
//! Custom dialect registration, talk and dialogue vetoes, unknown dialects on
//! the wire, and action dialects handed from a cellet to the worker pool.

use cellcloud::nucleus::{Cellet, MemoryTransport, NucleusError};
use cellcloud::talk::dialect::{ActionDialect, ActionDialectFactory};
use cellcloud::talk::{AnyDialect, Dialect, DialectFactory, DialectMeta, Primitive, Stuff};
use cellcloud::{Nucleus, NucleusConfig};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Single-word dialect with a gate flag the factory inspects
#[derive(Debug, Clone, Default)]
struct GateDialect {
    meta: DialectMeta,
    word: String,
    closed: bool,
}

impl GateDialect {
    const NAME: &'static str = "GateDialect";
}

impl Dialect for GateDialect {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn meta(&self) -> &DialectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut DialectMeta {
        &mut self.meta
    }

    fn translate(&self) -> Option<Primitive> {
        let mut primitive = Primitive::new();
        primitive.commit(Stuff::subject(self.word.as_str()));
        primitive.commit(Stuff::attributive(self.closed));
        Some(primitive)
    }

    fn build(&mut self, primitive: &Primitive) {
        self.word = primitive
            .subjects()
            .first()
            .map(|s| s.value().to_string())
            .unwrap_or_default();
        self.closed = primitive
            .attributives()
            .first()
            .and_then(Stuff::as_bool)
            .unwrap_or(false);
    }

    fn clone_dialect(&self) -> Box<dyn Dialect> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct GateFactory {
    talked: AtomicUsize,
    dialogued: AtomicUsize,
}

fn is_closed(dialect: &AnyDialect) -> bool {
    dialect.downcast_ref::<GateDialect>().is_some_and(|gate| gate.closed)
}

impl DialectFactory for GateFactory {
    fn name(&self) -> &str {
        GateDialect::NAME
    }

    fn create(&self, tracker: &str) -> AnyDialect {
        AnyDialect::Custom(Box::new(GateDialect {
            meta: DialectMeta::new(tracker),
            ..GateDialect::default()
        }))
    }

    fn on_talk(&self, _identifier: &str, dialect: &AnyDialect) -> bool {
        !is_closed(dialect) || dialect.tracker() == "inbound-test"
    }

    fn talked(&self, _identifier: &str, _dialect: &AnyDialect) {
        self.talked.fetch_add(1, Ordering::SeqCst);
    }

    fn on_dialogue(&self, _identifier: &str, dialect: &AnyDialect) -> bool {
        !is_closed(dialect)
    }

    fn dialogued(&self, _identifier: &str, _dialect: &AnyDialect) {
        self.dialogued.fetch_add(1, Ordering::SeqCst);
    }
}

struct Inbox {
    received: Mutex<Vec<Primitive>>,
    actions: Arc<ActionDialectFactory>,
    acted: Arc<AtomicUsize>,
}

impl Cellet for Inbox {
    fn identifier(&self) -> &str {
        "inbox"
    }

    fn dialogue(&self, _peer_tag: &str, primitive: Primitive) {
        if let Some(action) = primitive.dialect().and_then(AnyDialect::as_action) {
            let acted = self.acted.clone();
            action.clone().act(
                &self.actions,
                Arc::new(move |_dialect: ActionDialect| {
                    acted.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        self.received.lock().push(primitive);
    }
}

struct Fixture {
    nucleus: Nucleus,
    wire: Arc<MemoryTransport>,
    gate: Arc<GateFactory>,
    inbox: Arc<Inbox>,
}

fn fixture() -> Fixture {
    let wire = Arc::new(MemoryTransport::new());
    let nucleus = Nucleus::new(NucleusConfig::default(), wire.clone()).unwrap();

    let gate = Arc::new(GateFactory::default());
    nucleus.dialects().add_factory(gate.clone());

    let inbox = Arc::new(Inbox {
        received: Mutex::new(Vec::new()),
        actions: nucleus.action_factory().clone(),
        acted: Arc::new(AtomicUsize::new(0)),
    });
    nucleus.register_cellet(inbox.clone()).unwrap();

    Fixture {
        nucleus,
        wire,
        gate,
        inbox,
    }
}

fn gate(word: &str, closed: bool, tracker: &str) -> AnyDialect {
    AnyDialect::Custom(Box::new(GateDialect {
        meta: DialectMeta::new(tracker),
        word: word.to_string(),
        closed,
    }))
}

#[test]
fn test_custom_dialect_round_trip() {
    let fx = fixture();
    fx.nucleus.talk_dialect("inbox", "peer", gate("hello", false, "g1")).unwrap();
    assert_eq!(fx.gate.talked.load(Ordering::SeqCst), 1);

    let frame = fx.wire.drain().remove(0);
    assert!(frame.payload.ends_with(b"[GateDialect@g1]"));

    fx.nucleus.on_primitive_arrived("inbox", "peer", &frame.payload).unwrap();
    assert_eq!(fx.gate.dialogued.load(Ordering::SeqCst), 1);

    let received = fx.inbox.received.lock();
    let dialect = received[0].dialect().unwrap();
    let rebuilt = dialect.downcast_ref::<GateDialect>().unwrap();
    assert_eq!(rebuilt.word, "hello");
    assert_eq!(dialect.owner_tag(), Some("peer"));
    assert_eq!(dialect.meta().cellet_identifier(), Some("inbox"));
}

#[test]
fn test_talk_veto_sends_nothing() {
    let fx = fixture();
    let result = fx.nucleus.talk_dialect("inbox", "peer", gate("no", true, "g2"));

    assert!(matches!(result, Err(NucleusError::Vetoed { dialect }) if dialect == "GateDialect"));
    assert!(fx.wire.is_empty());
    assert_eq!(fx.gate.talked.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dialogue_veto_drops_silently() {
    let fx = fixture();
    // This tracker passes the outbound gate so a closed dialect reaches the wire
    fx.nucleus
        .talk_dialect("inbox", "peer", gate("no", true, "inbound-test"))
        .unwrap();
    let frame = fx.wire.drain().remove(0);

    fx.nucleus.on_primitive_arrived("inbox", "peer", &frame.payload).unwrap();
    assert!(fx.inbox.received.lock().is_empty());
    assert_eq!(fx.gate.dialogued.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_dialect_is_delivered_unbound() {
    let fx = fixture();
    let raw = b"[1.0]{sub=x:string}[NobodyDialect@t]";
    fx.nucleus.on_primitive_arrived("inbox", "peer", raw).unwrap();

    let received = fx.inbox.received.lock();
    assert_eq!(received.len(), 1);
    assert!(!received[0].is_dialectal());
    assert_eq!(received[0].subjects()[0].value(), "x");
}

#[test]
fn test_arrival_for_unknown_cellet() {
    let fx = fixture();
    let result = fx.nucleus.on_primitive_arrived("nobody", "peer", b"[1.0]");
    assert!(matches!(result, Err(NucleusError::CelletNotFound(id)) if id == "nobody"));
}

#[test]
fn test_action_dialect_reaches_worker_pool() {
    let fx = fixture();
    for n in 0..5 {
        let dialect = ActionDialect::new(format!("t{n}"))
            .with_action("notify")
            .with_param("n", n);
        fx.nucleus.talk_dialect("inbox", "peer", dialect).unwrap();
    }

    for frame in fx.wire.drain() {
        fx.nucleus.on_primitive_arrived("inbox", "peer", &frame.payload).unwrap();
    }

    assert!(fx.nucleus.action_factory().wait_idle(Duration::from_secs(10)));
    assert_eq!(fx.inbox.acted.load(Ordering::SeqCst), 5);
}

#[test]
fn test_untranslatable_dialect() {
    let fx = fixture();
    let result = fx.nucleus.talk_dialect("inbox", "peer", ActionDialect::new("t"));
    assert!(matches!(result, Err(NucleusError::Untranslatable(name)) if name == "ActionDialect"));
}

#[test]
fn test_shutdown_stops_action_dispatch() {
    let fx = fixture();
    fx.nucleus.shutdown();
    let accepted = ActionDialect::new("t")
        .with_action("late")
        .act(fx.nucleus.action_factory(), Arc::new(|_d: ActionDialect| {}));
    assert!(!accepted);
}
