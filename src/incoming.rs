use crate::{Error, TlsConfig};
use async_std::net::{Incoming as TcpIncoming, SocketAddr, TcpListener, TcpStream};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::Stream;
use futures_rustls::server::TlsStream;
use futures_rustls::TlsAcceptor;
use pin_project::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

type Handshake = BoxFuture<'static, Result<TlsStream<TcpStream>, Error>>;

pub(crate) enum ListenerAcceptor {
    /// One certificate for every connection.
    Static(TlsAcceptor),
    /// Certificate chosen per handshake.
    Selecting(TlsConfig),
}

impl ListenerAcceptor {
    fn accept(&self, tcp: TcpStream) -> Handshake {
        match self {
            ListenerAcceptor::Static(acceptor) => {
                let accept = acceptor.accept(tcp);
                Box::pin(async move { Ok(accept.await?) })
            }
            ListenerAcceptor::Selecting(config) => {
                let config = config.clone();
                Box::pin(async move { config.accept(tcp).await })
            }
        }
    }
}

/// A bound TCP listener that hands out TLS streams.
pub struct Listener {
    tcp: TcpListener,
    acceptor: ListenerAcceptor,
}

impl Listener {
    pub(crate) fn new(tcp: TcpListener, acceptor: ListenerAcceptor) -> Self {
        Self { tcp, acceptor }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accepts one connection and completes its handshake before returning.
    ///
    /// A failed handshake is returned as an error; the listener stays usable.
    pub async fn accept(&self) -> Result<(TlsStream<TcpStream>, SocketAddr), Error> {
        let (tcp, addr) = self.tcp.accept().await?;
        let tls = self.acceptor.accept(tcp).await?;
        Ok((tls, addr))
    }

    /// Stream of established TLS connections.
    ///
    /// Handshakes run concurrently; failed ones are logged and skipped, errors of the TCP
    /// listener are yielded.
    pub fn incoming(&self) -> Incoming<'_> {
        Incoming {
            tcp_incoming: self.tcp.incoming(),
            acceptor: &self.acceptor,
            tls_accepting: FuturesUnordered::new(),
        }
    }
}

#[pin_project]
pub struct Incoming<'a> {
    #[pin]
    tcp_incoming: TcpIncoming<'a>,
    acceptor: &'a ListenerAcceptor,
    #[pin]
    tls_accepting: FuturesUnordered<Handshake>,
}

impl Stream for Incoming<'_> {
    type Item = Result<TlsStream<TcpStream>, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.tls_accepting.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(tls))) => return Poll::Ready(Some(Ok(tls))),
                Poll::Ready(Some(Err(err))) => {
                    log::warn!("tls handshake failed: {}", err);
                    continue;
                }
                Poll::Ready(None) | Poll::Pending => {}
            }
            match this.tcp_incoming.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(tcp))) => this.tls_accepting.push(this.acceptor.accept(tcp)),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err.into()))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
