// A component layout's first top-level element is the component's element. It is opened
// with component operations so that attributes from the layout and from the invocation
// are collected before anything touches the DOM, and the invocation's attribute block is
// yielded right before the element is flushed. The manager sees the element as soon as it
// exists and once more when the layout has finished rendering.

//! Rewriting of component layouts around their root element.

use super::wire::{ClientSide, Statement};
use std::rc::Rc;

/// Rewrite layout statements, yielding attributes to `attrs_slot`.
pub fn scan(statements: &[Statement], attrs_slot: usize) -> Vec<Statement> {
    let mut output = Vec::with_capacity(statements.len() + 6);
    let mut depth = 0usize;
    let mut state = RootElement::Pending;

    for statement in statements {
        match statement {
            Statement::OpenElement(tag) if depth == 0 && state == RootElement::Pending => {
                output.push(client(ClientSide::SetComponentAttrs(true)));
                output.push(client(ClientSide::OpenComponentElement(Rc::clone(tag))));
                output.push(client(ClientSide::DidCreateElement));
                state = RootElement::Attributes;
                depth += 1;
            }
            Statement::FlushElement if state == RootElement::Attributes && depth == 1 => {
                output.push(Statement::Yield {
                    to: attrs_slot,
                    params: Vec::new(),
                });
                output.push(client(ClientSide::SetComponentAttrs(false)));
                output.push(Statement::FlushElement);
                state = RootElement::Done;
            }
            Statement::OpenElement(_) => {
                depth += 1;
                output.push(statement.clone());
            }
            Statement::CloseElement => {
                depth = depth.saturating_sub(1);
                output.push(statement.clone());
            }
            _ => output.push(statement.clone()),
        }
    }

    output.push(client(ClientSide::DidRenderLayout));
    output
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootElement {
    Pending,
    Attributes,
    Done,
}

fn client(statement: ClientSide) -> Statement {
    Statement::ClientSide(statement)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Statement {
        Statement::Text(Rc::from(s))
    }

    #[test]
    fn test_root_element_is_wrapped() {
        let statements = vec![
            Statement::OpenElement(Rc::from("div")),
            Statement::StaticAttr {
                name: Rc::from("class"),
                value: Rc::from("card"),
                namespace: None,
            },
            Statement::FlushElement,
            Statement::OpenElement(Rc::from("span")),
            Statement::FlushElement,
            text("hi"),
            Statement::CloseElement,
            Statement::CloseElement,
        ];
        let scanned = scan(&statements, 3);
        assert_eq!(
            scanned[..3],
            [
                client(ClientSide::SetComponentAttrs(true)),
                client(ClientSide::OpenComponentElement(Rc::from("div"))),
                client(ClientSide::DidCreateElement),
            ]
        );
        assert!(matches!(scanned[3], Statement::StaticAttr { .. }));
        assert_eq!(scanned[4], Statement::Yield { to: 3, params: vec![] });
        assert_eq!(scanned[5], client(ClientSide::SetComponentAttrs(false)));
        // The inner element is left alone.
        assert_eq!(scanned[7], Statement::OpenElement(Rc::from("span")));
        assert_eq!(scanned[8], Statement::FlushElement);
        assert_eq!(scanned.last(), Some(&client(ClientSide::DidRenderLayout)));
    }

    #[test]
    fn test_layout_without_element() {
        let scanned = scan(&[text("bare")], 1);
        assert_eq!(scanned, vec![text("bare"), client(ClientSide::DidRenderLayout)]);
    }
}
