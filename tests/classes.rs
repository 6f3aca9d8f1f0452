//! Class generation: member layout, constructors, operator overloads,
//! inheritance flattening.

mod common;
use common::run_output;

#[test]
fn members_and_methods() {
    let source = "class Point {\nvar x = 0\nvar y = 0\ndef new(self, x, y) { self.x = x\nself.y = y\nreturn self }\ndef sum(self) { return self.x + self.y }\n}\np = Point(3, 4)\nprint p.sum()";
    assert_eq!(run_output(source), "7\n");
}

#[test]
fn defaults_apply_before_the_constructor() {
    let source = "class Box {\nvar label = \"empty\"\n}\nb = Box()\nprint b.label";
    assert_eq!(run_output(source), "empty\n");
}

#[test]
fn instances_do_not_share_member_cells() {
    let source = "class Cell {\nvar v = 0\n}\na = Cell()\nb = Cell()\na.v = 5\nprint a.v\nprint b.v";
    assert_eq!(run_output(source), "5\n0\n");
}

#[test]
fn operator_overloads_dispatch_on_the_class() {
    let source = "class Vec {\nvar x = 0\ndef new(self, x) { self.x = x\nreturn self }\ndef +(self, other) { return Vec(self.x + other.x) }\n}\na = Vec(1)\nb = Vec(2)\nc = a + b\nprint c.x";
    assert_eq!(run_output(source), "3\n");
}

#[test]
fn comparison_overload() {
    let source = "class Id {\nvar n = 0\ndef new(self, n) { self.n = n\nreturn self }\ndef ==(self, other) { return self.n == other.n }\n}\nprint Id(4) == Id(4)\nprint Id(4) == Id(5)";
    assert_eq!(run_output(source), "true\nfalse\n");
}

#[test]
fn base_members_flatten_into_derived() {
    let source = "class Animal {\nvar name = \"?\"\ndef describe(self) { return self.name }\n}\nclass Dog : Animal {\ndef new(self, name) { self.name = name\nreturn self }\ndef speak(self) { return self.describe() + \" barks\" }\n}\nd = Dog(\"rex\")\nprint d.speak()";
    assert_eq!(run_output(source), "rex barks\n");
}

#[test]
fn method_overloads_merge_by_arity() {
    let source = "class Greeter {\ndef hello(self) { return \"hi\" }\ndef hello(self, name) { return \"hi \" + name }\n}\ng = Greeter()\nprint g.hello()\nprint g.hello(\"mint\")";
    assert_eq!(run_output(source), "hi\nhi mint\n");
}

#[test]
fn typeof_reports_the_class_name() {
    let source = "class Thing { }\nt = Thing()\nprint typeof t";
    assert_eq!(run_output(source), "Thing\n");
}

#[test]
fn membersof_lists_declared_members() {
    let source = "class Pair {\nvar a = 0\nvar b = 0\n}\nfor name in membersof Pair() { print name }";
    assert_eq!(run_output(source), "a\nb\n");
}

#[test]
fn classes_nest_in_packages() {
    let source = "package geo {\nclass Point {\nvar x = 1\n}\n}\np = geo.Point()\nprint p.x";
    assert_eq!(run_output(source), "1\n");
}
