/// A message sent from a [`super::nonblocking::NonBlocking`] writer to its
/// background [`super::worker::Worker`] thread.
pub(crate) enum Msg {
	Line(Vec<u8>),
	Shutdown,
}
