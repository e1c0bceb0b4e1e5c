use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpListener,
    time::{Instant, Sleep, sleep},
};

/// 创建 IPv4 + IPv6 双栈监听
pub(crate) fn create_dual_stack_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?; // 支持快速重启
    socket.set_only_v6(false)?;
    let addr = SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], port));
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener = std::net::TcpListener::from(socket);
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

pin_project! {
    /// Closes a connection that has neither read nor written for `timeout`.
    #[derive(Debug)]
    pub struct TimeoutIO<T> {
        #[pin]
        inner: T,
        timeout: Duration,
        #[pin]
        idle: Sleep,
    }
}

impl<T> TimeoutIO<T>
where
    T: AsyncRead + AsyncWrite,
{
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            idle: sleep(timeout),
        }
    }

    /// Run one poll on the inner stream; progress re-arms the idle timer.
    fn track<R>(
        self: Pin<&mut Self>, cx: &mut Context<'_>, op: &'static str,
        poll: impl FnOnce(Pin<&mut T>, &mut Context<'_>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        let this = self.project();
        let res = poll(this.inner, cx);
        if res.is_ready() {
            this.idle.reset(Instant::now() + *this.timeout);
        } else if this.idle.poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, format!("{op} idle for {:?}", this.timeout))));
        }
        res
    }
}

impl<T> AsyncRead for TimeoutIO<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        self.track(cx, "read", |inner, cx| inner.poll_read(cx, buf))
    }
}

impl<T> AsyncWrite for TimeoutIO<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.track(cx, "write", |inner, cx| inner.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.track(cx, "write", |inner, cx| inner.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.track(cx, "write", |inner, cx| inner.poll_shutdown(cx))
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
        self.track(cx, "write", |inner, cx| inner.poll_write_vectored(cx, bufs))
    }
}
