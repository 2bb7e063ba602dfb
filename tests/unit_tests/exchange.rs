use fenris_hetero::array::Array1D;
use fenris_hetero::comm::{Communicator, SerialCommunicator, ThreadCommunicator};
use fenris_hetero::dispatch::Dispatcher;
use fenris_hetero::space::{with_space, MemorySpace};
use fenris_hetero::system::HaloExchange;
use proptest::prelude::*;
use proptest::sample::subsequence;
use std::thread;

type NeighborLists = Vec<(usize, Vec<usize>, Vec<usize>)>;

/// Rank 0 owns entries 0 and 1 of its vector, which rank 1 holds as ghosts 3 and 4.
fn neighbor_lists(rank: usize) -> NeighborLists {
    if rank == 0 {
        vec![(1, vec![0, 1], vec![])]
    } else {
        vec![(0, vec![], vec![3, 4])]
    }
}

fn plan(rank: usize) -> HaloExchange {
    HaloExchange::from_neighbor_lists(neighbor_lists(rank)).unwrap()
}

fn initial_values(rank: usize) -> Vec<f64> {
    if rank == 0 {
        vec![10.0, 20.0, 30.0]
    } else {
        vec![1.0, 2.0, 3.0, 4.0, 5.0]
    }
}

/// Runs a forward and a reverse exchange on two ranks and returns the values after each.
fn exchange_on_two_ranks(
    lists: [NeighborLists; 2],
    values: [Vec<f64>; 2],
    dispatcher: fn() -> Dispatcher,
    device_buffers: bool,
) -> Vec<(Vec<f64>, Vec<f64>)> {
    let comms: Vec<_> = ThreadCommunicator::group(2)
        .into_iter()
        .map(|comm| comm.with_device_buffers(device_buffers))
        .collect();
    let (lists, values) = (&lists, &values);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let dispatcher = dispatcher();
                    let space = dispatcher.space();
                    let rank = comm.rank();
                    let mut halo = HaloExchange::from_neighbor_lists(lists[rank].clone()).unwrap();
                    let values = Array1D::from_slice(&values[rank]);

                    halo.forward(&values, comm, &dispatcher).unwrap();
                    let after_forward = with_space(space, || values.to_vec());
                    halo.reverse(&values, comm, &dispatcher).unwrap();
                    let after_reverse = with_space(space, || values.to_vec());
                    (after_forward, after_reverse)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    })
}

fn run_exchanges(dispatcher: fn() -> Dispatcher, device_buffers: bool) -> Vec<(Vec<f64>, Vec<f64>)> {
    exchange_on_two_ranks(
        [neighbor_lists(0), neighbor_lists(1)],
        [initial_values(0), initial_values(1)],
        dispatcher,
        device_buffers,
    )
}

fn check(results: &[(Vec<f64>, Vec<f64>)]) {
    let (forward_0, reverse_0) = &results[0];
    let (forward_1, reverse_1) = &results[1];
    assert_eq!(forward_0, &vec![10.0, 20.0, 30.0]);
    assert_eq!(forward_1, &vec![1.0, 2.0, 3.0, 10.0, 20.0]);
    assert_eq!(reverse_0, &vec![20.0, 40.0, 30.0]);
    assert_eq!(reverse_1, forward_1);
}

#[test]
fn host_exchange() {
    check(&run_exchanges(Dispatcher::host, false));
}

#[test]
fn device_exchange_staged_through_host() {
    check(&run_exchanges(Dispatcher::device, false));
}

#[test]
fn device_exchange_with_device_buffers() {
    check(&run_exchanges(Dispatcher::device, true));
}

#[test]
fn device_exchanges_leave_the_host_side_untouched() {
    let comms = ThreadCommunicator::group(2);
    let host_sides: Vec<Vec<f64>> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let dispatcher = Dispatcher::device();
                    let mut halo = plan(comm.rank());
                    let values = Array1D::from_slice(&initial_values(comm.rank()));
                    halo.forward(&values, comm, &dispatcher).unwrap();
                    with_space(MemorySpace::Host, || values.to_vec())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });
    assert_eq!(host_sides[1], initial_values(1));
}

#[test]
fn neighbors_without_entries_are_dropped() {
    let halo = HaloExchange::from_neighbor_lists(vec![(1, vec![], vec![]), (2, vec![0], vec![])]).unwrap();
    assert_eq!(halo.num_neighbors(), 1);
    assert_eq!(halo.neighbor_ranks(), vec![2]);
}

#[test]
fn empty_plans_do_not_communicate() {
    let mut halo = HaloExchange::empty().unwrap();
    let values = Array1D::from_slice(&[1.0]);
    let dispatcher = Dispatcher::host();
    halo.forward(&values, &SerialCommunicator, &dispatcher)
        .unwrap();
    halo.reverse(&values, &SerialCommunicator, &dispatcher)
        .unwrap();
    assert_eq!(values.to_vec(), vec![1.0]);
    assert_eq!(dispatcher.stats().launches, 0);
}

/// Distinct owned entries on rank 0 paired with as many distinct ghost entries on rank 1.
fn owned_and_ghosts() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (0..=6usize).prop_flat_map(|n| {
        (
            subsequence((0..12).collect::<Vec<usize>>(), n).prop_shuffle(),
            subsequence((0..10).collect::<Vec<usize>>(), n).prop_shuffle(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn ghost_entries_receive_and_return_owner_values(
        (owned, ghosts) in owned_and_ghosts(),
        device in any::<bool>()
    ) {
        let values_0: Vec<f64> = (0..12).map(|i| 100.0 + i as f64).collect();
        let values_1: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let lists = [vec![(1, owned.clone(), vec![])], vec![(0, vec![], ghosts.clone())]];
        let dispatcher: fn() -> Dispatcher = if device { Dispatcher::device } else { Dispatcher::host };
        let results = exchange_on_two_ranks(lists, [values_0.clone(), values_1.clone()], dispatcher, device);

        let mut forward_1 = values_1;
        let mut reverse_0 = values_0.clone();
        for (&o, &g) in owned.iter().zip(&ghosts) {
            forward_1[g] = values_0[o];
            reverse_0[o] += values_0[o];
        }
        prop_assert_eq!(&results[0].0, &values_0);
        prop_assert_eq!(&results[1].0, &forward_1);
        prop_assert_eq!(&results[0].1, &reverse_0);
        prop_assert_eq!(&results[1].1, &forward_1);
    }
}
