//! Echoes lines between two ends of a socket pair, with both ends driven by one `PollLoop`.
//!
//! The client sends a few messages to the server, which echoes every chunk it receives back
//! in upper case. Run with `RUST_LOG=lw_event=debug` to see what the streams and the loop do.

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;

    use futures::executor::block_on;
    use lw_event::{BasicStream, Emitter, PollLoop, declare_events, emitter};

    declare_events!(Reply);

    emitter! {
        struct ClientEvents {
            Reply(String),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (client_end, server_end) = UnixStream::pair()?;

    let host = Rc::new(PollLoop::new());
    let client = BasicStream::new(Rc::clone(&host), host.open(client_end.into())?);
    let server = BasicStream::new(Rc::clone(&host), host.open(server_end.into())?);

    let server_clone = server.clone();
    let served = server.read(move |chunk| {
        let reply = String::from_utf8_lossy(&chunk).to_uppercase();

        if let Err(error) = server_clone.write(reply) {
            eprintln!("server failed to reply: {error}");
        }
    })?;

    let events = Rc::new(ClientEvents::new());
    events.on(Reply, |(text,)| println!("client received: {text}"));

    let messages = ["hello", "from the", "event loop"];
    let expected: usize = messages.iter().map(|message| message.len()).sum();

    let events_clone = Rc::clone(&events);
    let client_clone = client.clone();
    let mut received = 0_usize;
    let replies = client.read(move |chunk| {
        events_clone.emit(Reply, (String::from_utf8_lossy(&chunk).into_owned(),));

        received = received.saturating_add(chunk.len());
        if received >= expected {
            // Stopping drops this callback, and with it the last clone of the client besides
            // the one in `main`.
            if let Err(error) = client_clone.stop() {
                eprintln!("client failed to stop reading: {error}");
            }
        }
    })?;

    for message in messages {
        let _sent = client.write(message)?;
    }

    // Once the client has all replies, closing it ends the input of the server.
    let served = replies.then_future(move |count| {
        println!("client read {count} bytes in total");
        drop(client);
        served
    });

    host.run()?;

    println!("server echoed {} bytes", block_on(served)?);

    drop(server);
    host.run()?;

    Ok(())
}

#[cfg(not(unix))]
fn main() {
    println!("This example requires a Unix platform.");
}
