use crossbeam_channel::Receiver;
use model::{Color, Point, Rect, Transform};
use render_protocol::{FilterKind, Paint, SceneEvent};

use super::*;

fn rect_spec(x: f64, y: f64, width: f64, height: f64, color: Color) -> NodeSpec {
    NodeSpec::object(Content::rectangle(
        Point::new(x, y),
        Point::new(x + width, y + height),
    ))
    .with_paint(Paint::solid(color))
}

fn drain(receiver: &Receiver<SceneEvent>) -> Vec<SceneEvent> {
    receiver.try_iter().collect()
}

#[test]
fn add_object_notifies_added_then_invalidated() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    let events = tree.subscribe(root).expect("root is a layer");

    let node = tree
        .push_object(root, rect_spec(0.0, 0.0, 50.0, 50.0, Color::BLACK))
        .expect("push rect");

    assert_eq!(
        drain(&events),
        vec![
            SceneEvent::ObjectAdded {
                layer: root,
                node,
                index: 0
            },
            SceneEvent::AreaInvalidated {
                layer: root,
                area: Rect::new(0, 0, 50, 50),
                child_index: Some(0)
            },
        ]
    );
    assert_eq!(tree.node(root).expect("root").area(), Rect::new(0, 0, 50, 50));
}

#[test]
fn nested_invalidation_reports_each_layers_own_child_index() {
    let document = Document::new(200, 200);
    let mut tree = document.write();
    let root = tree.root();
    tree.push_object(root, rect_spec(0.0, 0.0, 10.0, 10.0, Color::BLACK))
        .expect("first");
    let group = tree
        .push_object(root, NodeSpec::layer(LayerStyle::default()))
        .expect("group");
    for offset in 0..3 {
        tree.push_object(
            group,
            rect_spec(f64::from(offset) * 20.0, 0.0, 10.0, 10.0, Color::WHITE),
        )
        .expect("child");
    }
    let root_events = tree.subscribe(root).expect("subscribe root");
    let group_events = tree.subscribe(group).expect("subscribe group");

    let target = tree.children(group).expect("group children")[2];
    tree.set_transform(target, Transform::translate(5.0, 0.0))
        .expect("move child");

    assert_eq!(
        drain(&group_events),
        vec![SceneEvent::AreaInvalidated {
            layer: group,
            area: Rect::new(40, 0, 55, 10),
            child_index: Some(2)
        }]
    );
    assert_eq!(
        drain(&root_events),
        vec![SceneEvent::AreaInvalidated {
            layer: root,
            area: Rect::new(40, 0, 55, 10),
            child_index: Some(1)
        }]
    );
}

#[test]
fn change_counters_bump_along_the_ancestor_chain_only() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    let first = tree
        .push_object(root, rect_spec(0.0, 0.0, 10.0, 10.0, Color::BLACK))
        .expect("first");
    let second = tree
        .push_object(root, rect_spec(20.0, 0.0, 10.0, 10.0, Color::BLACK))
        .expect("second");
    let first_before = tree.node(first).expect("first").change_counter();
    let second_before = tree.node(second).expect("second").change_counter();
    let root_before = tree.node(root).expect("root").change_counter();

    tree.set_paint(second, Paint::solid(Color::WHITE))
        .expect("repaint");

    assert_eq!(tree.node(first).expect("first").change_counter(), first_before);
    assert!(tree.node(second).expect("second").change_counter() > second_before);
    assert!(tree.node(root).expect("root").change_counter() > root_before);
}

#[test]
fn suspended_updates_are_batched_into_one_invalidation() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    for index in 0..4 {
        tree.push_object(
            root,
            rect_spec(f64::from(index) * 10.0, 0.0, 5.0, 5.0, Color::BLACK),
        )
        .expect("push");
    }
    let events = tree.subscribe(root).expect("subscribe");

    tree.suspend_updates(true);
    tree.suspend_updates(true);
    tree.remove_object(root, 3).expect("remove 3");
    tree.remove_object(root, 1).expect("remove 1");
    tree.suspend_updates(false);
    let during: Vec<_> = drain(&events)
        .into_iter()
        .filter(|event| matches!(event, SceneEvent::AreaInvalidated { .. }))
        .collect();
    assert!(during.is_empty());

    tree.suspend_updates(false);
    assert_eq!(
        drain(&events),
        vec![SceneEvent::AreaInvalidated {
            layer: root,
            area: Rect::new(10, 0, 35, 5),
            child_index: Some(1)
        }]
    );
}

#[test]
fn remove_object_drops_the_whole_subtree() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    let group = tree
        .push_object(root, NodeSpec::layer(LayerStyle::default()))
        .expect("group");
    let child = tree
        .push_object(group, rect_spec(0.0, 0.0, 4.0, 4.0, Color::BLACK))
        .expect("child");
    assert_eq!(tree.node_count(), 3);

    let removed = tree.remove_object(root, 0).expect("remove group");

    assert_eq!(removed, group);
    assert!(!tree.contains(group));
    assert!(!tree.contains(child));
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.node(root).expect("root").area(), Rect::EMPTY);
}

#[test]
fn filters_cover_the_whole_document() {
    let document = Document::new(64, 32);
    let mut tree = document.write();
    let root = tree.root();
    let filter = tree
        .push_object(root, NodeSpec::filter(FilterKind::Invert))
        .expect("filter");
    assert_eq!(tree.node(filter).expect("filter").area(), Rect::new(0, 0, 64, 32));
}

#[test]
fn invalid_operations_report_errors() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    let rect = tree
        .push_object(root, rect_spec(0.0, 0.0, 4.0, 4.0, Color::BLACK))
        .expect("rect");

    assert_eq!(
        tree.add_object(root, 5, rect_spec(0.0, 0.0, 1.0, 1.0, Color::BLACK)),
        Err(SceneError::IndexOutOfBounds { index: 5, len: 1 })
    );
    assert_eq!(
        tree.remove_object(root, 1),
        Err(SceneError::IndexOutOfBounds { index: 1, len: 1 })
    );
    assert_eq!(
        tree.push_object(rect, rect_spec(0.0, 0.0, 1.0, 1.0, Color::BLACK)),
        Err(SceneError::NotALayer)
    );
    assert_eq!(
        tree.set_transform(root, Transform::IDENTITY),
        Err(SceneError::KindMismatch)
    );
    assert_eq!(
        tree.set_transform(rect, Transform::translate(f64::NAN, 0.0)),
        Err(SceneError::NonFiniteTransform)
    );
    tree.remove_object(root, 0).expect("remove");
    assert_eq!(
        tree.set_paint(rect, Paint::default()),
        Err(SceneError::NodeNotFound)
    );
}

#[test]
fn empty_invalidations_are_dropped_silently() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    let events = tree.subscribe(root).expect("subscribe");
    tree.invalidate(root, Rect::new(10, 10, 10, 40), Some(0))
        .expect("degenerate area is not an error");
    assert!(drain(&events).is_empty());
}

#[test]
fn disconnected_listeners_are_pruned() {
    let document = Document::new(100, 100);
    let mut tree = document.write();
    let root = tree.root();
    drop(tree.subscribe(root).expect("subscribe"));
    let live = tree.subscribe(root).expect("subscribe");
    tree.invalidate(root, Rect::new(0, 0, 1, 1), None)
        .expect("invalidate");
    assert_eq!(drain(&live).len(), 1);
    let listener_count = tree
        .node(root)
        .and_then(SceneNode::as_layer)
        .map(|layer| layer.listeners.lock().map(|listeners| listeners.len()).unwrap_or(0));
    assert_eq!(listener_count, Some(1));
}

#[test]
fn readers_can_subscribe_under_the_read_lock() {
    let document = Document::new(10, 10);
    let receiver = {
        let tree = document.read();
        tree.subscribe(tree.root()).expect("subscribe")
    };
    {
        let mut tree = document.write();
        let root = tree.root();
        tree.push_object(root, rect_spec(1.0, 1.0, 2.0, 2.0, Color::BLACK))
            .expect("push");
    }
    assert_eq!(drain(&receiver).len(), 2);
}
