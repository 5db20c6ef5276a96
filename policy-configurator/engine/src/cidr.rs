use policy_configurator_core::IpNet;

/// Returns the disjoint networks covering `net` minus every network in `excepts`.
///
/// The result is aggregated and sorted. Exceptions are expected to be subnets of `net`; any part of
/// an exception outside of `net` is ignored.
pub(crate) fn subtract(net: IpNet, excepts: &[IpNet]) -> Vec<IpNet> {
    let excepts = excepts.iter().map(IpNet::trunc).collect::<Vec<_>>();
    let mut nets = Vec::new();
    subtract_into(net.trunc(), &excepts, &mut nets);
    IpNet::aggregate(&nets)
}

// Two networks are either disjoint or one contains the other, so a network that neither is covered
// by an exception nor contains one can be kept whole.
fn subtract_into(net: IpNet, excepts: &[IpNet], nets: &mut Vec<IpNet>) {
    if excepts.iter().any(|except| except.contains(&net)) {
        return;
    }

    if !excepts.iter().any(|except| net.contains(except)) {
        nets.push(net);
        return;
    }

    // An exception lies strictly within `net`, so it can always be split.
    if let Ok(halves) = net.subnets(net.prefix_len() + 1) {
        for half in halves {
            subtract_into(half, excepts, nets);
        }
    }
}
