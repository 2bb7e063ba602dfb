use crate::fixtures::{build, owned_values, residual_phase, Diffusion, LinePartition, RESIDUAL, SOLUTION};
use fenris_hetero::comm::SerialCommunicator;
use fenris_hetero::dispatch::{
    Datum, DispatchConfig, Kernel, KernelObject, LaunchStats, Material, MaterialObject, MaterialProperty,
    ResidualObjectParams,
};
use fenris_hetero::problem::Problem;
use fenris_hetero::space::with_space;
use fenris_hetero::system::{PhaseConfig, TagId, TagSet};
use std::sync::Arc;
use util::assert_slices_close;

/// Counts the steps since initialization.
struct StepCounter {
    count: Arc<MaterialProperty<f64>>,
}

impl Material for StepCounter {
    const HAS_STATEFUL_INIT: bool = true;

    fn compute_qp_properties(&self, qp: usize, datum: &mut Datum) {
        let old = self.count.old(datum, qp);
        self.count.set(datum, qp, old + 1.0);
    }

    fn init_qp_stateful_properties(&self, qp: usize, datum: &mut Datum) {
        self.count.set(datum, qp, 0.0);
    }
}

struct Conductivity {
    value: f64,
    conductivity: Arc<MaterialProperty<f64>>,
}

impl Material for Conductivity {
    fn compute_qp_properties(&self, qp: usize, datum: &mut Datum) {
        self.conductivity.set(datum, qp, self.value);
    }
}

/// `∫ k grad u · grad v` with `k` a material property.
struct HeatConduction {
    solution: TagId,
    conductivity: Arc<MaterialProperty<f64>>,
}

impl Kernel for HeatConduction {
    fn compute_qp_residual(&self, i: usize, qp: usize, datum: &mut Datum) -> f64 {
        let k = self.conductivity.get(datum, qp);
        let var = datum.variable();
        k * datum
            .gradient(var, self.solution, qp)
            .dot(&datum.grad_test(i, qp))
    }
}

/// Stores the x-component of the outward normal on every side.
struct SideNormal {
    normal: Arc<MaterialProperty<f64>>,
}

impl Material for SideNormal {
    const ON_SIDES: bool = true;

    fn compute_qp_properties(&self, qp: usize, datum: &mut Datum) {
        if datum.is_side() {
            let n = datum.normal(qp);
            self.normal.set(datum, qp, n.x);
        }
    }
}

fn empty_problem(partition: &LinePartition) -> Problem {
    let (mesh, tables, system) = build(partition, &SerialCommunicator);
    Problem::new(mesh, tables, system, DispatchConfig::default())
}

fn current_values(problem: &Problem, property: &MaterialProperty<f64>) -> Vec<f64> {
    with_space(problem.dispatcher().space(), || property.current().to_vec())
}

#[test]
fn stateful_properties_advance_between_steps() {
    let partition = LinePartition::serial(3);
    let mut problem = empty_problem(&partition);
    let count = Arc::new(
        MaterialProperty::volume(problem.mesh())
            .unwrap()
            .stateful()
            .unwrap(),
    );
    let material = MaterialObject::new(
        StepCounter { count: count.clone() },
        "counter",
        &[],
        problem.mesh(),
        problem.tables(),
    )
    .unwrap();
    problem.add_material(material);
    problem.add_stateful_property(count.clone());

    let phase = PhaseConfig::residual(TagSet::single(RESIDUAL));
    problem
        .initialize_stateful(&phase, &SerialCommunicator)
        .unwrap();
    assert_eq!(current_values(&problem, &count), vec![0.0; 6]);

    for step in 1..=3 {
        problem.advance_step();
        problem
            .compute_residual(&phase, &SerialCommunicator)
            .unwrap();
        assert_eq!(current_values(&problem, &count), vec![step as f64; 6]);
        let old = with_space(problem.dispatcher().space(), || count.old_values().to_vec());
        assert_eq!(old, vec![(step - 1) as f64; 6]);
    }
}

#[test]
fn stateful_storage_is_allocated_once() {
    let partition = LinePartition::serial(2);
    let (mesh, _, _) = build(&partition, &SerialCommunicator);
    let property = MaterialProperty::<f64>::volume(&mesh).unwrap();
    assert!(!property.is_stateful());
    assert_eq!(property.len(), 4);
    let property = property.stateful().unwrap();
    assert!(property.stateful().is_err());
}

#[test]
fn materials_without_stateful_init_are_elided() {
    let partition = LinePartition::serial(2);
    let mut problem = empty_problem(&partition);
    let conductivity = Arc::new(MaterialProperty::volume(problem.mesh()).unwrap());
    let material = MaterialObject::new(
        Conductivity {
            value: 1.0,
            conductivity,
        },
        "conductivity",
        &[0],
        problem.mesh(),
        problem.tables(),
    )
    .unwrap();
    problem.add_material(material);
    problem
        .initialize_stateful(&PhaseConfig::residual(TagSet::single(RESIDUAL)), &SerialCommunicator)
        .unwrap();
    assert_eq!(problem.dispatcher().stats(), LaunchStats { launches: 0, elided: 1 });
}

#[test]
fn kernels_read_material_properties() {
    let partition = LinePartition::serial(5);
    let solution = owned_values(&partition, |x| x * x);

    let mut reference = empty_problem(&partition);
    let diffusion = KernelObject::new(
        Diffusion { solution: SOLUTION },
        ResidualObjectParams::new("diffusion", 0),
        reference.mesh(),
        reference.system(),
    )
    .unwrap();
    reference.add_kernel(diffusion);
    reference.set_vector(SOLUTION, &solution).unwrap();
    reference
        .compute_residual(&residual_phase(), &SerialCommunicator)
        .unwrap();

    let mut problem = empty_problem(&partition);
    let conductivity = Arc::new(MaterialProperty::volume(problem.mesh()).unwrap());
    let material = MaterialObject::new(
        Conductivity {
            value: 2.0,
            conductivity: conductivity.clone(),
        },
        "conductivity",
        &[],
        problem.mesh(),
        problem.tables(),
    )
    .unwrap();
    let conduction = KernelObject::new(
        HeatConduction {
            solution: SOLUTION,
            conductivity,
        },
        ResidualObjectParams::new("conduction", 0),
        problem.mesh(),
        problem.system(),
    )
    .unwrap();
    problem.add_material(material);
    problem.add_kernel(conduction);
    problem.set_vector(SOLUTION, &solution).unwrap();
    problem
        .compute_residual(&residual_phase(), &SerialCommunicator)
        .unwrap();

    let expected = reference.vector(RESIDUAL) * 2.0;
    let residual = problem.vector(RESIDUAL);
    assert!(expected.amax() > 0.0);
    assert_slices_close!(residual.as_slice(), expected.as_slice(), abstol = 1e-12);
    // The material runs on elements only.
    assert_eq!(problem.dispatcher().stats().elided, 2);
}

#[test]
fn side_materials_see_outward_normals() {
    let partition = LinePartition::serial(3);
    let mut problem = empty_problem(&partition);
    let normal = Arc::new(MaterialProperty::face(problem.mesh()).unwrap());
    let material = MaterialObject::new(
        SideNormal { normal: normal.clone() },
        "normals",
        &[],
        problem.mesh(),
        problem.tables(),
    )
    .unwrap();
    problem.add_material(material);
    problem
        .compute_residual(&PhaseConfig::residual(TagSet::single(RESIDUAL)), &SerialCommunicator)
        .unwrap();
    // Element, side and neighbor loops
    assert_eq!(problem.dispatcher().stats(), LaunchStats { launches: 3, elided: 0 });

    let values = current_values(&problem, &normal);
    for element in 0..3 {
        assert_eq!(values[problem.mesh().face_qp_offset(element, 0)], -1.0);
        assert_eq!(values[problem.mesh().face_qp_offset(element, 1)], 1.0);
    }
}

#[test]
fn materials_reject_unknown_subdomains() {
    let partition = LinePartition::serial(2);
    let (mesh, tables, _) = build(&partition, &SerialCommunicator);
    let normal = Arc::new(MaterialProperty::face(&mesh).unwrap());
    let result = MaterialObject::new(SideNormal { normal }, "normals", &[2], &mesh, &tables);
    assert!(result
        .err()
        .unwrap()
        .to_string()
        .contains("subdomain 2"));
}
