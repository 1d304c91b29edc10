//! Calculator service
//!
//! One operation per interaction pattern:
//!
//! - [Sum]: rpc, adds two numbers
//! - [SquareRoot]: rpc, fails for negative numbers
//! - [PrimeDecomposition]: server streaming, the prime factors of a number
//! - [ComputeAverage]: client streaming, the average of a stream of numbers
//! - [FindMaximum]: bidi streaming, the running maximum of a stream of numbers
use async_stream::stream;
use derive_more::{From, TryInto};
use futures_lite::{stream, Stream, StreamExt};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};

use quic_rpc::{
    message::{
        BidiStreaming, BidiStreamingMsg, ClientStreaming, ClientStreamingMsg, Msg, RpcMsg,
        ServerStreaming, ServerStreamingMsg,
    },
    server::{RpcChannel, RpcServerError},
    Connector, Listener, RpcClient, RpcServer, Service,
};

use crate::{
    duplex::DuplexSession,
    rpc::{run_server_loop, BidiHandle},
};

use super::RpcStatus;

/// Add two numbers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sum {
    /// first summand
    pub first_number: i32,
    /// second summand
    pub second_number: i32,
}

/// Result of a [Sum]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumResponse(pub i32);

/// Compute the square root of a number
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SquareRoot {
    /// must not be negative
    pub number: i32,
}

/// Result of a [SquareRoot]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquareRootResponse(pub f64);

/// Decompose a number into its prime factors
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrimeDecomposition {
    /// the number to decompose
    pub number: i32,
}

/// A single prime factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeDecompositionResponse(pub i32);

/// Average a stream of numbers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComputeAverage;

/// A number for a [ComputeAverage] call
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComputeAverageUpdate(pub i32);

/// Result of a [ComputeAverage]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComputeAverageResponse(pub f64);

/// Track the maximum of a stream of numbers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FindMaximum;

/// A number for a [FindMaximum] call
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FindMaximumUpdate(pub i32);

/// The maximum of all numbers seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMaximumResponse(pub i32);

/// Request enum
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum CalculatorRequest {
    Sum(Sum),
    SquareRoot(SquareRoot),
    PrimeDecomposition(PrimeDecomposition),
    ComputeAverage(ComputeAverage),
    ComputeAverageUpdate(ComputeAverageUpdate),
    FindMaximum(FindMaximum),
    FindMaximumUpdate(FindMaximumUpdate),
}

/// Response enum
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum CalculatorResponse {
    Sum(SumResponse),
    SquareRoot(Result<SquareRootResponse, RpcStatus>),
    PrimeDecomposition(PrimeDecompositionResponse),
    ComputeAverage(Result<ComputeAverageResponse, RpcStatus>),
    FindMaximum(FindMaximumResponse),
}

/// The calculator service. It has no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorService;

impl Service for CalculatorService {
    type Req = CalculatorRequest;
    type Res = CalculatorResponse;
}

impl RpcMsg<CalculatorService> for Sum {
    type Response = SumResponse;
}

impl RpcMsg<CalculatorService> for SquareRoot {
    type Response = Result<SquareRootResponse, RpcStatus>;
}

impl Msg<CalculatorService> for PrimeDecomposition {
    type Pattern = ServerStreaming;
}

impl ServerStreamingMsg<CalculatorService> for PrimeDecomposition {
    type Response = PrimeDecompositionResponse;
}

impl Msg<CalculatorService> for ComputeAverage {
    type Pattern = ClientStreaming;
}

impl ClientStreamingMsg<CalculatorService> for ComputeAverage {
    type Update = ComputeAverageUpdate;
    type Response = Result<ComputeAverageResponse, RpcStatus>;
}

impl Msg<CalculatorService> for FindMaximum {
    type Pattern = BidiStreaming;
}

impl BidiStreamingMsg<CalculatorService> for FindMaximum {
    type Update = FindMaximumUpdate;
    type Response = FindMaximumResponse;
}

/// Prime factors in ascending order, with multiplicity, by trial division.
#[derive(Debug, Clone)]
struct PrimeFactors {
    rest: i64,
    divisor: i64,
}

impl PrimeFactors {
    fn new(number: i32) -> Self {
        Self {
            rest: number as i64,
            divisor: 2,
        }
    }
}

impl Iterator for PrimeFactors {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        while self.rest > 1 {
            if self.divisor * self.divisor > self.rest {
                // what is left is prime
                let prime = self.rest;
                self.rest = 1;
                return Some(prime as i32);
            }
            if self.rest % self.divisor == 0 {
                self.rest /= self.divisor;
                return Some(self.divisor as i32);
            }
            self.divisor += 1;
        }
        None
    }
}

impl CalculatorService {
    async fn sum(self, req: Sum) -> SumResponse {
        SumResponse(req.first_number.wrapping_add(req.second_number))
    }

    async fn square_root(self, req: SquareRoot) -> Result<SquareRootResponse, RpcStatus> {
        if req.number < 0 {
            return Err(RpcStatus::invalid_argument(format!(
                "Received a negative number: {}",
                req.number
            )));
        }
        Ok(SquareRootResponse((req.number as f64).sqrt()))
    }

    fn prime_decomposition(
        self,
        req: PrimeDecomposition,
    ) -> impl Stream<Item = PrimeDecompositionResponse> {
        stream::iter(PrimeFactors::new(req.number).map(PrimeDecompositionResponse))
    }

    async fn compute_average(
        self,
        _req: ComputeAverage,
        updates: impl Stream<Item = ComputeAverageUpdate>,
    ) -> Result<ComputeAverageResponse, RpcStatus> {
        tokio::pin!(updates);
        let mut sum = 0i64;
        let mut count = 0u64;
        while let Some(ComputeAverageUpdate(n)) = updates.next().await {
            sum += n as i64;
            count += 1;
        }
        if count == 0 {
            return Err(RpcStatus::invalid_argument(
                "Cannot compute the average of no numbers",
            ));
        }
        Ok(ComputeAverageResponse(sum as f64 / count as f64))
    }

    fn find_maximum(
        self,
        _req: FindMaximum,
        updates: impl Stream<Item = FindMaximumUpdate>,
    ) -> impl Stream<Item = FindMaximumResponse> {
        stream! {
            tokio::pin!(updates);
            let mut max = i32::MIN;
            while let Some(FindMaximumUpdate(n)) = updates.next().await {
                max = max.max(n);
                yield FindMaximumResponse(max);
            }
        }
    }
}

async fn dispatch<C: Listener<CalculatorService>>(
    chan: RpcChannel<CalculatorService, C>,
    req: CalculatorRequest,
    service: CalculatorService,
) -> Result<(), RpcServerError<C>> {
    use CalculatorRequest::*;
    match req {
        Sum(msg) => chan.rpc(msg, service, CalculatorService::sum).await,
        SquareRoot(msg) => chan.rpc(msg, service, CalculatorService::square_root).await,
        PrimeDecomposition(msg) => {
            chan.server_streaming(msg, service, CalculatorService::prime_decomposition)
                .await
        }
        ComputeAverage(msg) => {
            chan.client_streaming(msg, service, CalculatorService::compute_average)
                .await
        }
        FindMaximum(msg) => {
            chan.bidi_streaming(msg, service, CalculatorService::find_maximum)
                .await
        }
        ComputeAverageUpdate(_) | FindMaximumUpdate(_) => {
            Err(RpcServerError::UnexpectedStartMessage)
        }
    }
}

/// Serve calculator requests until the listener fails.
pub async fn serve<C: Listener<CalculatorService>>(
    server: RpcServer<CalculatorService, C>,
) -> Result<(), RpcServerError<C>> {
    run_server_loop(server, CalculatorService, dispatch::<C>).await
}

/// Typed client for the [CalculatorService].
#[derive(Debug, Clone)]
pub struct CalculatorApi<C> {
    client: RpcClient<CalculatorService, C>,
}

impl<C: Connector<CalculatorService>> CalculatorApi<C> {
    /// Wrap a client.
    pub fn new(client: RpcClient<CalculatorService, C>) -> Self {
        Self { client }
    }

    /// Add two numbers. Overflow wraps around.
    pub async fn sum(&self, first_number: i32, second_number: i32) -> anyhow::Result<i32> {
        let SumResponse(res) = self
            .client
            .rpc(Sum {
                first_number,
                second_number,
            })
            .await?;
        Ok(res)
    }

    /// Square root of `number`.
    ///
    /// A negative number fails with an [RpcStatus] of code
    /// [InvalidArgument](super::StatusCode::InvalidArgument).
    pub async fn square_root(&self, number: i32) -> anyhow::Result<f64> {
        let SquareRootResponse(res) = self.client.rpc(SquareRoot { number }).await??;
        Ok(res)
    }

    /// Stream of the prime factors of `number`.
    pub async fn prime_decomposition(
        &self,
        number: i32,
    ) -> anyhow::Result<impl Stream<Item = anyhow::Result<i32>> + Send + 'static> {
        let factors = self
            .client
            .server_streaming(PrimeDecomposition { number })
            .await?;
        Ok(factors.map(|item| -> anyhow::Result<i32> { Ok(item?.0) }))
    }

    /// Average of `numbers`, which must not be empty.
    pub async fn compute_average(
        &self,
        numbers: impl IntoIterator<Item = i32>,
    ) -> anyhow::Result<f64> {
        let (mut send, recv) = self.client.client_streaming(ComputeAverage).await?;
        for n in numbers {
            send.send(ComputeAverageUpdate(n))
                .await
                .map_err(Into::<anyhow::Error>::into)?;
        }
        send.close().await.map_err(Into::<anyhow::Error>::into)?;
        // the server sees the end of the updates once the sink is gone
        drop(send);
        let ComputeAverageResponse(average) = recv.await??;
        Ok(average)
    }

    /// Send `numbers` to the server and pass every running maximum to `on_max`.
    ///
    /// The returned handle resolves once the server has answered every number.
    pub async fn find_maximum(
        &self,
        numbers: impl Stream<Item = i32> + Send + 'static,
        mut on_max: impl FnMut(i32) + Send + 'static,
        session: DuplexSession,
    ) -> anyhow::Result<BidiHandle<C>> {
        let handle = session
            .bidi(
                &self.client,
                FindMaximum,
                numbers.map(FindMaximumUpdate),
                move |FindMaximumResponse(max)| on_max(max),
            )
            .await?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::PrimeFactors;

    #[test]
    fn prime_factors() {
        let factors = |n| PrimeFactors::new(n).collect::<Vec<_>>();
        assert_eq!(factors(120), vec![2, 2, 2, 3, 5]);
        assert_eq!(factors(210), vec![2, 3, 5, 7]);
        assert_eq!(factors(97), vec![97]);
        assert_eq!(factors(i32::MAX), vec![i32::MAX]);
    }

    #[test]
    fn no_prime_factors_below_two() {
        for n in [i32::MIN, -12, 0, 1] {
            assert_eq!(PrimeFactors::new(n).next(), None);
        }
    }
}
