//! Session protocols driven through both ways of describing a machine.

use jacuzzi_fsm::{Fsm, FsmAction, FsmError, FsmResult, TransitionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Session {
    Connecting,
    Authenticating,
    Ready,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Event {
    Connected,
    Authenticated,
    Data,
    Hangup,
}

fn session_table() -> TransitionTable<Session, Event> {
    TransitionTable::new(Session::Connecting)
        .on(Session::Connecting, Event::Connected, Session::Authenticating)
        .on(Session::Authenticating, Event::Authenticated, Session::Ready)
        .on(Session::Ready, Event::Data, Session::Ready)
        .on(Session::Ready, Event::Hangup, Session::Closed)
        .fallback(Session::Failed)
        .finals([Session::Closed, Session::Failed])
}

#[test]
fn test_session_happy_path() {
    let mut fsm = Fsm::new(session_table());
    let events = [
        Event::Connected,
        Event::Authenticated,
        Event::Data,
        Event::Data,
        Event::Hangup,
    ];
    let mut active = Vec::new();
    for event in events {
        active.push(fsm.input(event).unwrap());
    }

    assert_eq!(active, vec![true, true, true, true, false]);
    assert_eq!(*fsm.state(), Session::Closed);
    assert_eq!(fsm.transitions(), 5);
    assert_eq!(fsm.input(Event::Data), Err(FsmError::Inactive));
}

#[test]
fn test_session_protocol_violation_fails() {
    let mut fsm = Fsm::new(session_table());
    fsm.input(Event::Connected).unwrap();
    // Data before authentication hits the fallback.
    assert!(!fsm.input(Event::Data).unwrap());
    assert_eq!(*fsm.state(), Session::Failed);
}

/// Parses `<digits>:<payload>` frames, one byte per input.
#[derive(Default)]
struct FrameParser {
    frames: Vec<String>,
    stopped_in: Option<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Length(usize),
    Payload { remaining: usize, data: String },
    End,
}

impl FsmAction<Frame, u8> for FrameParser {
    fn initial_state(&mut self) -> Frame {
        Frame::Length(0)
    }

    fn process(&mut self, state: &Frame, input: u8) -> FsmResult<Frame> {
        match (state, input) {
            (Frame::Length(0), b'.') => Ok(Frame::End),
            (Frame::Length(n), b'0'..=b'9') => Ok(Frame::Length(n * 10 + usize::from(input - b'0'))),
            (Frame::Length(0), b':') => Ok(Frame::Length(0)),
            (Frame::Length(n), b':') => Ok(Frame::Payload {
                remaining: *n,
                data: String::new(),
            }),
            (Frame::Payload { remaining, data }, byte) => {
                let mut data = data.clone();
                data.push(char::from(byte));
                if *remaining == 1 {
                    self.frames.push(data);
                    Ok(Frame::Length(0))
                } else {
                    Ok(Frame::Payload {
                        remaining: remaining - 1,
                        data,
                    })
                }
            }
            (_, byte) => Err(FsmError::Rejected {
                message: format!("unexpected byte {byte:#04x}"),
            }),
        }
    }

    fn is_final(&self, state: &Frame) -> bool {
        *state == Frame::End
    }

    fn on_stop(&mut self, state: &Frame) {
        self.stopped_in = Some(state.clone());
    }
}

fn feed(input: &[u8]) -> (FsmResult<()>, FrameParser) {
    let mut fsm = Fsm::new(FrameParser::default());
    let mut result = Ok(());
    for &byte in input {
        match fsm.input(byte) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    (result, fsm.into_action())
}

#[test]
fn test_frame_parser() {
    let (result, parser) = feed(b"5:hello3:abc.");
    assert!(result.is_ok());
    assert_eq!(parser.frames, vec!["hello".to_string(), "abc".to_string()]);
    assert_eq!(parser.stopped_in, Some(Frame::End));
}

#[test]
fn test_frame_parser_rejects_garbage() {
    let (result, parser) = feed(b"2:okx");
    assert!(matches!(result, Err(FsmError::Rejected { .. })));
    assert_eq!(parser.frames, vec!["ok".to_string()]);
    // The machine stops in the state it was in when the input was rejected.
    assert_eq!(parser.stopped_in, Some(Frame::Length(0)));
}

#[test]
fn test_transition_budget() {
    let mut fsm = Fsm::new(FrameParser::default()).with_max_transitions(4);
    for &byte in b"9:ab" {
        fsm.input(byte).unwrap();
    }
    assert_eq!(fsm.input(b'c'), Err(FsmError::TransitionLimit { max: 4 }));
    assert!(!fsm.is_active());
}
