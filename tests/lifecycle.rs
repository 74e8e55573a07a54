//! Component trees driven end to end against the in-memory target tree.

use std::cell::RefCell;
use std::rc::Rc;

use spark_view::{
    ComponentDef, ComponentOptions, Instance, MemoryDom, NodeOps, Patcher, PropDef, PropType, ReactiveObject,
    Result, Value, VNodeData, configure, reset_runtime, run_until_idle,
};

type Log = Rc<RefCell<Vec<String>>>;

fn record(log: &Log, entry: String) -> impl Fn(&Instance) -> Result<()> + 'static {
    let log = log.clone();
    move |_| {
        log.borrow_mut().push(entry.clone());
        Ok(())
    }
}

fn with_hooks(options: ComponentOptions, name: &str, log: &Log) -> ComponentOptions {
    options
        .created(record(log, format!("{name} created")))
        .before_mount(record(log, format!("{name} beforeMount")))
        .mounted(record(log, format!("{name} mounted")))
        .before_update(record(log, format!("{name} beforeUpdate")))
        .updated(record(log, format!("{name} updated")))
        .before_destroy(record(log, format!("{name} beforeDestroy")))
        .destroyed(record(log, format!("{name} destroyed")))
}

fn child_def(log: &Log) -> ComponentDef {
    let options = ComponentOptions::new()
        .name("child")
        .prop("label", PropDef::new().of(PropType::String))
        .render(|h| Ok(h.element("p", VNodeData::new(), vec![h.text(h.get("label").to_string())]).into()));
    with_hooks(options, "child", log).build()
}

fn parent_def(log: &Log) -> ComponentDef {
    let options = ComponentOptions::new()
        .name("parent")
        .data(|_| Ok(ReactiveObject::new().with("label", "hello")))
        .component("child", &child_def(log))
        .render(|h| {
            let child = h.element("child", VNodeData::new().prop("label", h.get("label")), vec![]);
            Ok(h.element("div", VNodeData::new(), vec![child]).into())
        });
    with_hooks(options, "parent", log).build()
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

#[test]
fn test_mount_update_destroy_ordering() {
    reset_runtime();
    let log: Log = Rc::default();
    let dom = MemoryDom::new();
    let body = dom.create_root("body");
    let target = dom.create_element("div");
    dom.append_child(body, target);

    let vm = Instance::new(&parent_def(&log), Patcher::new(dom.clone())).unwrap();
    vm.mount(Some(target)).unwrap();

    assert_eq!(dom.serialize(body), "<body><div><p>hello</p></div></body>");
    assert_eq!(
        take(&log),
        vec![
            "parent created",
            "parent beforeMount",
            "child created",
            "child beforeMount",
            "child mounted",
            "parent mounted",
        ]
    );

    vm.assign("label", "world");
    run_until_idle();
    assert_eq!(dom.serialize(body), "<body><div><p>world</p></div></body>");
    assert_eq!(
        take(&log),
        vec!["parent beforeUpdate", "child beforeUpdate", "child updated", "parent updated"]
    );

    let child = vm.children()[0].clone();
    vm.destroy();
    assert_eq!(
        take(&log),
        vec!["parent beforeDestroy", "child beforeDestroy", "child destroyed", "parent destroyed"]
    );
    assert!(child.is_destroyed());
    assert_eq!(dom.serialize(body), "<body></body>");
}

#[test]
fn test_el_option_mounts_after_created() {
    reset_runtime();
    let log: Log = Rc::default();
    let dom = MemoryDom::new();
    let body = dom.create_root("body");
    let target = dom.create_element("div");
    dom.append_child(body, target);

    let options = ComponentOptions::new()
        .el(target)
        .render(|h| Ok(h.element("span", VNodeData::new(), vec![h.text("hi")]).into()));
    let vm = Instance::new(&with_hooks(options, "root", &log).build(), Patcher::new(dom.clone())).unwrap();

    assert!(vm.is_mounted());
    assert_eq!(take(&log), vec!["root created", "root beforeMount", "root mounted"]);
    assert_eq!(dom.serialize(body), "<body><span>hi</span></body>");
}

#[test]
fn test_batched_mutations_render_once() {
    reset_runtime();
    let renders = Rc::new(RefCell::new(0));
    let counter = renders.clone();
    let def = ComponentOptions::new()
        .data(|_| Ok(ReactiveObject::new().with("a", 0).with("b", 0)))
        .render(move |h| {
            *counter.borrow_mut() += 1;
            let text = format!("{}-{}", h.get("a"), h.get("b"));
            Ok(h.element("span", VNodeData::new(), vec![h.text(text)]).into())
        })
        .build();
    let dom = MemoryDom::new();
    let vm = Instance::new(&def, Patcher::new(dom.clone())).unwrap();
    vm.mount(None).unwrap();

    vm.assign("a", 1);
    vm.assign("b", 2);
    vm.assign("a", 3);
    run_until_idle();

    assert_eq!(*renders.borrow(), 2);
    assert_eq!(dom.serialize(vm.el().unwrap()), "<span>3-2</span>");
}

#[test]
fn test_child_events_reach_parent_listener() {
    reset_runtime();
    let received: Rc<RefCell<Vec<Value>>> = Rc::default();
    let sink = received.clone();
    let child = ComponentOptions::new()
        .name("pinger")
        .method("ping", |vm, args| {
            vm.emit("ping", args);
            Ok(Value::Undefined)
        })
        .render(|h| Ok(h.element("button", VNodeData::new(), vec![]).into()))
        .build();
    let parent = ComponentOptions::new()
        .component("pinger", &child)
        .render(move |h| {
            let sink = sink.clone();
            let data = VNodeData::new().on("ping", move |args| {
                sink.borrow_mut().extend(args.iter().cloned());
                Ok(())
            });
            Ok(h.element("pinger", data, vec![]).into())
        })
        .build();

    let vm = Instance::new(&parent, Patcher::new(MemoryDom::new())).unwrap();
    vm.mount(None).unwrap();
    let pinger = vm.children()[0].clone();
    pinger.call("ping", &[Value::from(7)]).unwrap();

    assert_eq!(*received.borrow(), vec![Value::from(7)]);
}

#[test]
fn test_named_slots_render_in_child() {
    reset_runtime();
    let card = ComponentOptions::new()
        .name("card")
        .render(|h| {
            let mut children = h.slot("header");
            children.extend(h.render_slot("default", || vec![h.text("empty")]));
            Ok(h.element("section", VNodeData::new(), children).into())
        })
        .build();
    let page = ComponentOptions::new()
        .component("card", &card)
        .render(|h| {
            let header = h.element("h1", VNodeData::new().slot("header"), vec![h.text("Title")]);
            Ok(h.element("card", VNodeData::new(), vec![header]).into())
        })
        .build();

    let dom = MemoryDom::new();
    let vm = Instance::new(&page, Patcher::new(dom.clone())).unwrap();
    vm.mount(None).unwrap();
    assert_eq!(dom.serialize(vm.el().unwrap()), "<section><h1>Title</h1>empty</section>");
}

#[test]
fn test_render_error_is_captured_by_ancestor() {
    reset_runtime();
    configure(|c| c.silent = true);
    let captured: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = captured.clone();

    let broken = ComponentOptions::new()
        .name("broken")
        .render(|_| Err(spark_view::Error::msg("boom")))
        .build();
    let parent = ComponentOptions::new()
        .component("broken", &broken)
        .error_captured(move |_, err, _, info| {
            sink.borrow_mut().push(format!("{info}: {err}"));
            Ok(true)
        })
        .render(|h| Ok(h.element("div", VNodeData::new(), vec![h.element("broken", VNodeData::new(), vec![])]).into()))
        .build();

    let dom = MemoryDom::new();
    let vm = Instance::new(&parent, Patcher::new(dom.clone())).unwrap();
    vm.mount(None).unwrap();

    assert_eq!(*captured.borrow(), vec!["render: boom".to_string()]);
    assert_eq!(dom.serialize(vm.el().unwrap()), "<div><!----></div>");
}
