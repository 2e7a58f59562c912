//! Scripted munin-node used by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const UNKNOWN_COMMAND: &str =
    "# Unknown command. Try cap, list, nodes, config, fetch, version or quit\n";

#[derive(Default)]
struct NodeState {
    hostname: String,
    responses: HashMap<String, Vec<u8>>,
    hang_up_once: Mutex<Vec<String>>,
    truncate_once: Mutex<HashMap<String, String>>,
    bad_banner_after_first: bool,
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

/// Builder for a fake munin-node
pub struct NodeScript {
    state: NodeState,
}

impl NodeScript {
    pub fn new(hostname: &str) -> Self {
        Self {
            state: NodeState {
                hostname: hostname.to_string(),
                ..Default::default()
            },
        }
    }

    /// Answer `command` with `response` (sent verbatim)
    pub fn respond(self, command: &str, response: &str) -> Self {
        self.respond_bytes(command, response.as_bytes())
    }

    /// Answer `command` with raw bytes, which need not be UTF-8
    pub fn respond_bytes(mut self, command: &str, response: &[u8]) -> Self {
        self.state
            .responses
            .insert(command.to_string(), response.to_vec());
        self
    }

    /// Close the connection the first time `command` is received
    pub fn hang_up_once_on(self, command: &str) -> Self {
        self.state.hang_up_once.lock().unwrap().push(command.to_string());
        self
    }

    /// Send `partial` and close the connection the first time `command` is received
    pub fn truncate_once_on(self, command: &str, partial: &str) -> Self {
        self.state
            .truncate_once
            .lock()
            .unwrap()
            .insert(command.to_string(), partial.to_string());
        self
    }

    /// Greet every connection after the first with a banner that is not munin's
    pub fn bad_banner_after_first(mut self) -> Self {
        self.state.bad_banner_after_first = true;
        self
    }

    pub async fn spawn(self) -> FakeMuninNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(self.state);

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move { serve(stream, state).await });
            }
        });

        FakeMuninNode { address, state }
    }
}

async fn serve(stream: TcpStream, state: Arc<NodeState>) {
    let index = state.connections.fetch_add(1, Ordering::SeqCst);
    let (read, mut write) = stream.into_split();

    let banner = if state.bad_banner_after_first && index > 0 {
        "# lrrd node at elsewhere\n".to_string()
    } else {
        format!("# munin node at {}\n", state.hostname)
    };
    if write.write_all(banner.as_bytes()).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(command)) = lines.next_line().await {
        let command = command.trim().to_string();
        state.commands.lock().unwrap().push(command.clone());

        let hang_up = {
            let mut armed = state.hang_up_once.lock().unwrap();
            match armed.iter().position(|c| *c == command) {
                Some(i) => {
                    armed.remove(i);
                    true
                }
                None => false,
            }
        };
        if hang_up {
            return;
        }

        let partial = state.truncate_once.lock().unwrap().remove(&command);
        if let Some(partial) = partial {
            let _ = write.write_all(partial.as_bytes()).await;
            return;
        }

        let response = state
            .responses
            .get(&command)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_COMMAND.as_bytes().to_vec());
        if write.write_all(&response).await.is_err() {
            return;
        }
    }
}

/// Handle on a running fake munin-node
pub struct FakeMuninNode {
    address: String,
    state: Arc<NodeState>,
}

impl FakeMuninNode {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Every command received so far, across connections
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn count_command(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

pub const CPU_CONFIG: &str = "graph_title CPU usage\n\
graph_vlabel %\n\
# this is a comment\n\
user.label user\n\
user.info CPU time spent by normal programs\n\
system.label system\n\
system.type DERIVE\n\
.\n";

pub const CPU_FETCH: &str = "user.value 12.5\nsystem.value 99\n.\n";

pub const LOAD_CONFIG: &str = "graph_title Load average\nload.label load\n.\n";

pub const LOAD_FETCH: &str = "load.value 0.42\n.\n";

/// A node exposing `cpu` and `load`
pub fn cpu_and_load(hostname: &str) -> NodeScript {
    NodeScript::new(hostname)
        .respond("list", "cpu load\n")
        .respond("config cpu", CPU_CONFIG)
        .respond("fetch cpu", CPU_FETCH)
        .respond("config load", LOAD_CONFIG)
        .respond("fetch load", LOAD_FETCH)
}
