//! Integration tests for correlated queries and mode tracking.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{DEFAULT_ISUPPORT, FakeServer};
use parking_lot::Mutex;
use warden_core::banlist::list_bans;
use warden_core::nickserv::{self, Credentials, NickServ, StatusError, StatusLevel};
use warden_core::whois::whois;
use warden_core::{ModeKey, RequestError};

fn record_modes(server: &FakeServer) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    server.modes.handle(ModeKey::Any, move |e| {
        sink.lock().push(format!(
            "{}{} {}",
            e.action.sign(),
            e.mode,
            e.argument.as_deref().unwrap_or("-")
        ));
    });
    seen
}

#[tokio::test]
async fn test_prefix_modes_take_arguments() {
    let server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let seen = record_modes(&server);

    server
        .feed(":op!o@host MODE #chan +ov-h alice bob carol")
        .await;

    assert_eq!(*seen.lock(), vec!["+o alice", "+v bob", "-h carol"]);
}

#[tokio::test]
async fn test_limit_removal_consumes_no_argument() {
    let server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let seen = record_modes(&server);

    server.feed(":op!o@host MODE #chan +b-l *!*@host").await;
    server.feed(":op!o@host MODE #chan +l-k 10 secret").await;

    assert_eq!(
        *seen.lock(),
        vec!["+b *!*@host", "-l -", "+l 10", "-k secret"]
    );
}

#[tokio::test]
async fn test_mode_events_carry_source() {
    let server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    server.modes.handle(ModeKey::added('b'), move |e| {
        sink.lock()
            .push((e.nick.clone(), e.host.clone(), e.target.clone()));
    });

    server.feed(":op!o@staff.host MODE #chan +b *!*@x").await;
    server.feed(":op!o@staff.host MODE #chan -b *!*@x").await;

    assert_eq!(
        *seen.lock(),
        vec![("op".to_string(), "staff.host".to_string(), "#chan".to_string())]
    );
}

#[tokio::test]
async fn test_whois_collects_replies() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { whois(&conn, "Bob").await });

    assert_eq!(server.sent().await, "WHOIS Bob");
    server
        .feed(":irc.example.net 311 warden Bob ~bob host.example * :Bob Realname")
        .await;
    server
        .feed(":irc.example.net 311 warden Carol ~c other.example * :Carol")
        .await;
    server
        .feed(":irc.example.net 312 warden Bob hub.example.net :The hub")
        .await;
    server
        .feed(":irc.example.net 319 warden Bob :@#ops +#chat #idle")
        .await;
    server
        .feed(":irc.example.net 313 warden bob :is an IRC operator")
        .await;
    server
        .feed(":irc.example.net 317 warden Bob 42 1700000000 :seconds idle, signon time")
        .await;
    server
        .feed(":irc.example.net 301 warden Bob :gone fishing")
        .await;
    server
        .feed(":irc.example.net 318 warden Bob :End of /WHOIS list.")
        .await;

    let resp = query.await.unwrap().unwrap();
    assert_eq!(resp.nick, "Bob");
    assert_eq!(resp.ident, "~bob");
    assert_eq!(resp.host, "host.example");
    assert_eq!(resp.realname, "Bob Realname");
    assert_eq!(resp.server.host, "hub.example.net");
    assert!(resp.is_operator);
    assert!(resp.is_away);
    assert_eq!(resp.away_message, "gone fishing");
    assert_eq!(resp.idle, Duration::from_secs(42));
    assert_eq!(resp.sign_on.map(|t| t.timestamp()), Some(1_700_000_000));
    assert_eq!(resp.channels.len(), 3);
    assert_eq!(resp.channels["#ops"], Some('@'));
    assert_eq!(resp.channels["#chat"], Some('+'));
    assert_eq!(resp.channels["#idle"], None);
}

#[tokio::test]
async fn test_whois_errors() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;

    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { whois(&conn, "ghost").await });
    server.sent().await;
    server
        .feed(":irc.example.net 401 warden someoneelse :No such nick/channel")
        .await;
    server
        .feed(":irc.example.net 401 warden ghost :No such nick/channel")
        .await;
    assert_eq!(query.await.unwrap().unwrap_err(), RequestError::NoSuchNick);

    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { whois(&conn, "busy").await });
    server.sent().await;
    server
        .feed(":irc.example.net 263 warden WHOIS :Server load is temporarily too heavy")
        .await;
    assert_eq!(
        query.await.unwrap().unwrap_err(),
        RequestError::ServerOverloaded
    );
}

#[tokio::test(start_paused = true)]
async fn test_whois_times_out_and_cleans_up() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { whois(&conn, "silent").await });
    server.sent().await;

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(query.await.unwrap().unwrap_err(), RequestError::TimedOut);
}

#[tokio::test]
async fn test_nickserv_status() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { nickserv::status(&conn, &["alice", "bob"]).await });

    assert_eq!(server.sent().await, "PRIVMSG NickServ :STATUS alice bob");
    server
        .feed(":NickServ!services@services.example NOTICE warden :STATUS alice 3")
        .await;
    // Spoofed replies are ignored.
    server
        .feed(":mallory!m@evil NOTICE warden :STATUS bob 3")
        .await;
    server
        .feed(":NickServ!services@services.example NOTICE warden :STATUS Bob 1")
        .await;

    let result = query.await.unwrap().unwrap();
    assert_eq!(result["alice"], Ok(StatusLevel::Password));
    assert_eq!(result["bob"], Ok(StatusLevel::NotRecognized));
}

#[tokio::test]
async fn test_nickserv_status_repeated_nick_asked_once() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { nickserv::status(&conn, &["bob", "BOB"]).await });

    assert_eq!(server.sent().await, "PRIVMSG NickServ :STATUS bob");
    server
        .feed(":NickServ!services@services.example NOTICE warden :STATUS BOB 3")
        .await;

    let result = tokio::time::timeout(Duration::from_secs(5), query)
        .await
        .expect("answered without waiting for the timeout")
        .unwrap()
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result["bob"], Ok(StatusLevel::Password));
}

#[tokio::test]
async fn test_nickserv_status_limits() {
    let server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let nicks: Vec<String> = (0..17).map(|i| format!("n{i}")).collect();
    let nicks: Vec<&str> = nicks.iter().map(String::as_str).collect();
    assert_eq!(
        nickserv::status(&server.conn, &nicks).await.unwrap_err(),
        StatusError::TooManyNicks(17)
    );
    assert!(nickserv::status(&server.conn, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_nickserv_identify_then_join() {
    let (conn, mut outbound) = warden_core::Connection::new(
        warden_core::ServerIdentity::new(common::SERVER, false),
        common::ME,
    );
    let modes = warden_core::ModeTracker::register(&conn);
    let _nickserv = NickServ::register(
        &conn,
        &modes,
        Credentials {
            username: "vpn".to_string(),
            password: "hunter2".to_string(),
        },
        || vec!["#a".to_string(), "#b".to_string()],
    );

    conn.process(":irc.example.net 001 warden :Welcome".parse().unwrap())
        .await;
    assert_eq!(
        outbound.recv().await.unwrap().to_string(),
        "PRIVMSG NickServ :IDENTIFY vpn hunter2"
    );

    conn.process(":NickServ!s@services MODE warden +r".parse().unwrap())
        .await;
    assert_eq!(outbound.recv().await.unwrap().to_string(), "JOIN #a,#b");
}

#[tokio::test]
async fn test_list_bans() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;
    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { list_bans(&conn, "#chan").await });

    assert_eq!(server.sent().await, "MODE #chan +b");
    server
        .feed(":irc.example.net 367 warden #chan *!*@a.example op!o@staff 1700000000")
        .await;
    server
        .feed(":irc.example.net 367 warden #other *!*@ignored op!o@staff 1700000000")
        .await;
    server
        .feed(":irc.example.net 367 warden #chan *!*@b.example")
        .await;
    server
        .feed(":irc.example.net 368 warden #chan :End of channel ban list")
        .await;

    let bans = query.await.unwrap().unwrap();
    assert_eq!(bans.len(), 2);
    assert_eq!(bans[0].hostmask, "*!*@a.example");
    assert_eq!(bans[0].nick, "op");
    assert_eq!(bans[0].timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
    assert_eq!(bans[1].source, "");
    assert_eq!(bans[1].timestamp, None);
}

#[tokio::test]
async fn test_list_bans_errors() {
    let mut server = FakeServer::start(DEFAULT_ISUPPORT).await;
    assert_eq!(
        list_bans(&server.conn, "notachannel").await.unwrap_err(),
        RequestError::NotAChannel
    );

    let conn = Arc::clone(&server.conn);
    let query = tokio::spawn(async move { list_bans(&conn, "#gone").await });
    server.sent().await;
    server
        .feed(":irc.example.net 442 warden #gone :You're not on that channel")
        .await;
    assert_eq!(query.await.unwrap().unwrap_err(), RequestError::NotOnChannel);
}

#[tokio::test]
async fn test_list_bans_without_ban_mode() {
    let server = FakeServer::start("CHANTYPES=# CHANMODES=eI,k,l,imnpst").await;
    assert!(list_bans(&server.conn, "#chan").await.unwrap().is_empty());
}
